// vga.rs
//! Text-mode console with several virtual terminals.
//!
//! Every terminal renders into its own page-aligned back-buffer. The one on
//! screen is mirrored into VGA memory as it is written. Switching saves
//! what is on screen (programs that used `vidmap` may have drawn there)
//! into the outgoing buffer and paints the incoming one.

use core::ptr;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use log::debug;
use spin::Mutex;

use crate::arch;
use crate::config::NR_TERM;
use crate::device::{FileCursor, FileOperations};
use crate::error::{KResult, KernelError};

pub const WIDTH: usize = 80;
pub const HEIGHT: usize = 25;
pub const INPUT_MAX: usize = 128;

const ATTR: u16 = 0x07 << 8;
const BLANK: u16 = ATTR | b' ' as u16;
const TAB_WIDTH: usize = 4;

#[repr(C, align(4096))]
struct ScreenBuffer([u16; WIDTH * HEIGHT]);

struct Terminal {
    screen: ScreenBuffer,
    row: usize,
    col: usize,
    input: [u8; INPUT_MAX],
    input_len: usize,
    /// Completed lines waiting in `input`.
    lines: usize,
    opened: bool,
}

enum Dirty {
    None,
    Cell(usize),
    All,
}

impl Terminal {
    const fn new() -> Self {
        Self {
            screen: ScreenBuffer([BLANK; WIDTH * HEIGHT]),
            row: 0,
            col: 0,
            input: [0; INPUT_MAX],
            input_len: 0,
            lines: 0,
            opened: false,
        }
    }

    fn clear(&mut self) {
        self.screen.0 = [BLANK; WIDTH * HEIGHT];
        self.row = 0;
        self.col = 0;
    }

    fn new_line(&mut self) -> Dirty {
        self.col = 0;
        if self.row + 1 < HEIGHT {
            self.row += 1;
            return Dirty::None;
        }
        self.screen.0.copy_within(WIDTH.., 0);
        self.screen.0[(HEIGHT - 1) * WIDTH..].fill(BLANK);
        Dirty::All
    }

    fn put_byte(&mut self, byte: u8) -> Dirty {
        match byte {
            b'\n' => self.new_line(),
            b'\r' => {
                self.col = 0;
                Dirty::None
            }
            b'\t' => {
                let mut dirty = Dirty::None;
                for _ in 0..TAB_WIDTH - self.col % TAB_WIDTH {
                    dirty = dirty.merge(self.put_byte(b' '));
                }
                dirty
            }
            0x08 => {
                if self.col == 0 && self.row > 0 {
                    self.row -= 1;
                    self.col = WIDTH;
                }
                if self.col == 0 {
                    return Dirty::None;
                }
                self.col -= 1;
                let idx = self.row * WIDTH + self.col;
                self.screen.0[idx] = BLANK;
                Dirty::Cell(idx)
            }
            _ => {
                let mut dirty = Dirty::None;
                if self.col >= WIDTH {
                    dirty = self.new_line();
                }
                let idx = self.row * WIDTH + self.col;
                self.screen.0[idx] = ATTR | byte as u16;
                self.col += 1;
                dirty.merge(Dirty::Cell(idx))
            }
        }
    }

    fn cursor(&self) -> usize {
        self.row * WIDTH + self.col.min(WIDTH - 1)
    }

    /// Moves one complete line (or as much as fits) into `buf`.
    fn take_line(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        let mut consumed_newline = false;
        while n < self.input_len && n < buf.len() {
            buf[n] = self.input[n];
            n += 1;
            if buf[n - 1] == b'\n' {
                consumed_newline = true;
                break;
            }
        }
        self.input.copy_within(n..self.input_len, 0);
        self.input_len -= n;
        if consumed_newline {
            self.lines -= 1;
        }
        n
    }
}

impl Dirty {
    fn merge(self, other: Dirty) -> Dirty {
        match (self, other) {
            (Dirty::All, _) | (_, Dirty::All) => Dirty::All,
            (Dirty::None, d) => d,
            (d, Dirty::None) => d,
            // two separate cells, repaint both
            (Dirty::Cell(_), Dirty::Cell(_)) => Dirty::All,
        }
    }
}

const TERMINAL: Mutex<Terminal> = Mutex::new(Terminal::new());

pub struct Console {
    terms: [Mutex<Terminal>; NR_TERM],
    active: AtomicUsize,
    /// Base of VGA text memory; 0 when there is no screen to mirror into.
    video: usize,
    shell_requests: AtomicU8,
    launched: AtomicU8,
}

impl Console {
    pub const fn new(video: usize) -> Self {
        Self {
            terms: [TERMINAL; NR_TERM],
            active: AtomicUsize::new(0),
            video,
            shell_requests: AtomicU8::new(0),
            launched: AtomicU8::new(0),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_active(&self, term: usize) -> bool {
        self.active() == term
    }

    /// Physical address of `term`'s back-buffer.
    pub fn back_buffer_address(&self, term: usize) -> usize {
        let guard = self.terms[term].lock();
        &guard.screen as *const ScreenBuffer as usize
    }

    /// Resets input state; the screen is cleared the first time only.
    pub fn open_terminal(&self, term: usize) -> KResult<()> {
        let t = self.terms.get(term).ok_or(KernelError::OutOfRange)?;
        arch::without_interrupts(|| {
            let mut t = t.lock();
            t.input_len = 0;
            t.lines = 0;
            if !t.opened {
                t.clear();
                t.opened = true;
                self.repaint(term, &t);
            }
        });
        Ok(())
    }

    pub fn write(&self, term: usize, bytes: &[u8]) -> KResult<usize> {
        let t = self.terms.get(term).ok_or(KernelError::OutOfRange)?;
        arch::without_interrupts(|| {
            let mut t = t.lock();
            for &byte in bytes {
                let dirty = t.put_byte(byte);
                self.flush(term, &t, dirty);
            }
            if self.is_active(term) {
                set_cursor(t.cursor());
            }
        });
        Ok(bytes.len())
    }

    /// Blocks until `term` has a complete line, then copies up to
    /// `buf.len()` bytes of it, newline included.
    pub fn read_line(&self, term: usize, buf: &mut [u8]) -> KResult<usize> {
        let t = self.terms.get(term).ok_or(KernelError::OutOfRange)?;
        loop {
            let ready = arch::without_interrupts(|| {
                let mut t = t.lock();
                (t.lines > 0).then(|| t.take_line(buf))
            });
            if let Some(n) = ready {
                return Ok(n);
            }
            arch::wait_for_interrupt();
        }
    }

    /// Line editing for a key typed on the active terminal.
    pub fn handle_input(&self, byte: u8) {
        let term = self.active();
        arch::without_interrupts(|| {
            let mut t = self.terms[term].lock();
            let echo = match byte {
                0x08 => {
                    if t.input_len == 0 || t.input[t.input_len - 1] == b'\n' {
                        return;
                    }
                    t.input_len -= 1;
                    true
                }
                b'\n' => {
                    if t.input_len == INPUT_MAX {
                        return;
                    }
                    let len = t.input_len;
                    t.input[len] = b'\n';
                    t.input_len += 1;
                    t.lines += 1;
                    true
                }
                0x0C => {
                    t.clear();
                    self.repaint(term, &t);
                    false
                }
                0x20..=0x7E | b'\t' => {
                    // keep the last slot for the newline
                    if t.input_len >= INPUT_MAX - 1 {
                        return;
                    }
                    let len = t.input_len;
                    t.input[len] = byte;
                    t.input_len += 1;
                    true
                }
                _ => false,
            };
            if echo {
                let dirty = t.put_byte(byte);
                self.flush(term, &t, dirty);
            }
            set_cursor(t.cursor());
        });
    }

    /// Puts `term` on screen.
    pub fn switch(&self, term: usize) -> KResult<()> {
        if term >= NR_TERM {
            return Err(KernelError::OutOfRange);
        }
        arch::without_interrupts(|| {
            let old = self.active();
            if old == term {
                return;
            }
            {
                let mut t = self.terms[old].lock();
                self.save_screen(&mut t);
            }
            self.active.store(term, Ordering::Release);
            let t = self.terms[term].lock();
            self.repaint(term, &t);
            set_cursor(t.cursor());
        });
        debug!("terminal {} on screen", term);
        Ok(())
    }

    /// Asks the scheduler to start a root shell on `term` unless one was
    /// already launched there.
    pub fn request_shell(&self, term: usize) {
        if term >= NR_TERM {
            return;
        }
        let bit = 1u8 << term;
        if self.launched.load(Ordering::Acquire) & bit == 0 {
            self.shell_requests.fetch_or(bit, Ordering::AcqRel);
        }
    }

    pub fn take_shell_request(&self) -> Option<usize> {
        let pending = self.shell_requests.load(Ordering::Acquire);
        if pending == 0 {
            return None;
        }
        let term = pending.trailing_zeros() as usize;
        let bit = 1u8 << term;
        self.shell_requests.fetch_and(!bit, Ordering::AcqRel);
        self.mark_launched(term);
        Some(term)
    }

    pub fn mark_launched(&self, term: usize) {
        self.launched.fetch_or(1 << term, Ordering::AcqRel);
    }

    pub fn has_shell(&self, term: usize) -> bool {
        self.launched.load(Ordering::Acquire) & (1 << term) != 0
    }

    fn video_cell(&self, idx: usize) -> Option<*mut u16> {
        (self.video != 0).then(|| (self.video as *mut u16).wrapping_add(idx))
    }

    fn flush(&self, term: usize, t: &Terminal, dirty: Dirty) {
        if !self.is_active(term) {
            return;
        }
        match dirty {
            Dirty::None => {}
            Dirty::Cell(idx) => {
                if let Some(cell) = self.video_cell(idx) {
                    unsafe { ptr::write_volatile(cell, t.screen.0[idx]) };
                }
            }
            Dirty::All => self.repaint(term, t),
        }
    }

    fn repaint(&self, term: usize, t: &Terminal) {
        if !self.is_active(term) || self.video == 0 {
            return;
        }
        for (idx, &cell) in t.screen.0.iter().enumerate() {
            if let Some(dst) = self.video_cell(idx) {
                unsafe { ptr::write_volatile(dst, cell) };
            }
        }
    }

    fn save_screen(&self, t: &mut Terminal) {
        if self.video == 0 {
            return;
        }
        for (idx, cell) in t.screen.0.iter_mut().enumerate() {
            if let Some(src) = self.video_cell(idx) {
                *cell = unsafe { ptr::read_volatile(src) };
            }
        }
    }

    #[cfg(test)]
    fn cell(&self, term: usize, row: usize, col: usize) -> u8 {
        self.terms[term].lock().screen.0[row * WIDTH + col] as u8
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn set_cursor(pos: usize) {
    unsafe {
        arch::outb(0x3D4, 0x0F);
        arch::outb(0x3D5, (pos & 0xFF) as u8);
        arch::outb(0x3D4, 0x0E);
        arch::outb(0x3D5, ((pos >> 8) & 0xFF) as u8);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn set_cursor(_pos: usize) {}

impl FileOperations for Console {
    fn open(&self, _name: &[u8]) -> KResult<()> {
        Ok(())
    }

    fn read(&self, file: &mut FileCursor, buf: &mut [u8]) -> KResult<usize> {
        self.read_line(file.term, buf)
    }

    fn write(&self, file: &mut FileCursor, buf: &[u8]) -> KResult<usize> {
        Console::write(self, file.term, buf)
    }

    fn close(&self, _file: &mut FileCursor) -> KResult<()> {
        Ok(())
    }
}

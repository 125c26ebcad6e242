// syscall.rs
//! `int 0x80` entry points. Arguments arrive in ebx, ecx and edx with the
//! call number in eax; every failure is reported as -1.

use core::slice;

use log::debug;

use crate::config::{ARGS_MAX, FD_MAX, FD_MIN, FILENAME_MAX, KERNEL_MEM_END, STDIN, STDOUT, VIDEO_PHYS};
use crate::context::Cpu;
use crate::device::Device;
use crate::error::{to_user, KResult, KernelError};
use crate::system::System;

pub const SYS_HALT: u32 = 1;
pub const SYS_EXECUTE: u32 = 2;
pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_OPEN: u32 = 5;
pub const SYS_CLOSE: u32 = 6;
pub const SYS_GETARGS: u32 = 7;
pub const SYS_VIDMAP: u32 = 8;
pub const SYS_SET_HANDLER: u32 = 9;
pub const SYS_SIGRETURN: u32 = 10;

/// Longest command `execute` will scan for: a name, a space and arguments.
const COMMAND_MAX: usize = FILENAME_MAX + 1 + ARGS_MAX;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

fn check_fd(fd: i32, direction: Direction) -> KResult<usize> {
    if !(FD_MIN..FD_MAX).contains(&fd) {
        return Err(KernelError::InvalidDescriptor);
    }
    let fd = fd as usize;
    match direction {
        Direction::Read if fd == STDOUT => Err(KernelError::InvalidDescriptor),
        Direction::Write if fd == STDIN => Err(KernelError::InvalidDescriptor),
        _ => Ok(fd),
    }
}

/// Bytes of a NUL-terminated user string, at most `max` long.
unsafe fn user_str<'a>(ptr: usize, max: usize) -> KResult<&'a [u8]> {
    if ptr == 0 {
        return Err(KernelError::NullArgument);
    }
    let base = ptr as *const u8;
    let len = (0..=max)
        .find(|&i| *base.add(i) == 0)
        .ok_or(KernelError::OutOfRange)?;
    Ok(slice::from_raw_parts(base, len))
}

unsafe fn user_buf<'a>(ptr: usize, len: usize) -> KResult<&'a [u8]> {
    if (len as i32) < 0 {
        return Err(KernelError::InvalidArgument);
    }
    if len == 0 {
        return Ok(&[]);
    }
    if ptr == 0 {
        return Err(KernelError::NullArgument);
    }
    Ok(slice::from_raw_parts(ptr as *const u8, len))
}

unsafe fn user_buf_mut<'a>(ptr: usize, len: usize) -> KResult<&'a mut [u8]> {
    if (len as i32) < 0 {
        return Err(KernelError::InvalidArgument);
    }
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr == 0 {
        return Err(KernelError::NullArgument);
    }
    Ok(slice::from_raw_parts_mut(ptr as *mut u8, len))
}

impl<C: Cpu> System<C> {
    /// Raw ABI entry: decodes user arguments and folds the result to `eax`.
    ///
    /// # Safety
    /// Pointer arguments are dereferenced as they are; they must be valid
    /// in the caller's address space when non-null.
    pub unsafe fn dispatch(&self, number: u32, a1: usize, a2: usize, a3: usize) -> i32 {
        let result = match number {
            SYS_HALT => self.halt(a1 as u8),
            SYS_EXECUTE => user_str(a1, COMMAND_MAX).and_then(|cmd| self.execute(cmd)),
            SYS_READ => user_buf_mut(a2, a3)
                .and_then(|buf| self.read(a1 as i32, buf))
                .map(|n| n as i32),
            SYS_WRITE => user_buf(a2, a3)
                .and_then(|buf| self.write(a1 as i32, buf))
                .map(|n| n as i32),
            SYS_OPEN => user_str(a1, FILENAME_MAX + 1)
                .and_then(|name| self.open(name))
                .map(|fd| fd as i32),
            SYS_CLOSE => self.close(a1 as i32).map(|_| 0),
            SYS_GETARGS => {
                if a1 == 0 {
                    Err(KernelError::NullArgument)
                } else {
                    user_buf_mut(a1, a2).and_then(|buf| self.getargs(buf)).map(|_| 0)
                }
            }
            SYS_VIDMAP => self.vidmap(a1 as *mut usize).map(|addr| addr as i32),
            SYS_SET_HANDLER => self.set_handler(a1 as i32, a2),
            SYS_SIGRETURN => self.sigreturn(),
            _ => Err(KernelError::Unsupported),
        };
        if let Err(e) = result {
            debug!("syscall {} failed: {}", number, e);
        }
        to_user(result)
    }

    pub fn read(&self, fd: i32, buf: &mut [u8]) -> KResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let fd = check_fd(fd, Direction::Read)?;
        let (device, mut cursor) = self.with_kernel(|k| {
            let pcb = k.current();
            let desc = pcb.descriptor(fd).ok_or(KernelError::InvalidDescriptor)?;
            Ok::<_, KernelError>((desc.device, desc.cursor(pcb.term)))
        })?;
        // may block; the kernel lock is not held here
        let n = self.drivers().read(device, &mut cursor, buf)?;
        self.with_kernel(|k| {
            if let Some(desc) = k.current_mut().fds.get_mut(fd).filter(|d| d.in_use) {
                desc.position = cursor.position;
            }
        });
        Ok(n)
    }

    pub fn write(&self, fd: i32, buf: &[u8]) -> KResult<usize> {
        if buf.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let fd = check_fd(fd, Direction::Write)?;
        let (device, mut cursor, is_rtc) = self.with_kernel(|k| {
            let pcb = k.current();
            let desc = pcb.descriptor(fd).ok_or(KernelError::InvalidDescriptor)?;
            Ok::<_, KernelError>((desc.device, desc.cursor(pcb.term), pcb.rtc_fd == Some(fd)))
        })?;
        let n = self.drivers().write(device, &mut cursor, buf)?;
        if is_rtc {
            let rate = self.rtc().rate();
            self.with_kernel(|k| k.current_mut().rtc_rate = rate);
        }
        Ok(n)
    }

    pub fn open(&self, name: &[u8]) -> KResult<usize> {
        let dentry = self.fs().lookup_by_name(name)?;
        let device = Device::from(dentry.kind);
        let fd = self.with_kernel(|k| {
            let pcb = k.current_mut();
            let fd = pcb.open_descriptor(device)?;
            pcb.fds[fd].inode = dentry.inode;
            if device == Device::Rtc {
                pcb.rtc_fd = Some(fd);
            }
            Ok::<_, KernelError>(fd)
        })?;
        if let Err(e) = self.drivers().open(device, name) {
            self.with_kernel(|k| k.current_mut().close_descriptor(fd).ok());
            return Err(e);
        }
        Ok(fd)
    }

    pub fn close(&self, fd: i32) -> KResult<()> {
        if !(STDOUT as i32 + 1..FD_MAX).contains(&fd) {
            return Err(KernelError::InvalidDescriptor);
        }
        let (closed, term) = self.with_kernel(|k| {
            let pcb = k.current_mut();
            if pcb.descriptor(fd as usize).is_none() {
                return Err(KernelError::InvalidDescriptor);
            }
            let closed = pcb.close_descriptor(fd as usize)?;
            Ok::<_, KernelError>((closed, pcb.term))
        })?;
        self.drivers().close(closed.device, &mut closed.cursor(term))
    }

    /// Copies the caller's argument string into `buf`, NUL-terminated when
    /// there is room for the terminator.
    pub fn getargs(&self, buf: &mut [u8]) -> KResult<()> {
        if buf.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        self.with_kernel(|k| {
            let args = k.current().args();
            if args.len() > buf.len() {
                return Err(KernelError::OutOfRange);
            }
            buf[..args.len()].copy_from_slice(args);
            if let Some(nul) = buf.get_mut(args.len()) {
                *nul = 0;
            }
            Ok(())
        })
    }

    /// Maps video memory into the caller and stores its user address at
    /// `out`.
    ///
    /// # Safety
    /// A non-null `out` must be writable.
    pub unsafe fn vidmap(&self, out: *mut usize) -> KResult<usize> {
        if out.is_null() {
            return Err(KernelError::NullArgument);
        }
        if (out as usize) < KERNEL_MEM_END {
            return Err(KernelError::OutOfRange);
        }
        let console = self.console();
        let mut addr = 0;
        self.with_kernel(|k| {
            let pid = k.current_pid();
            k.paging.map_video(pid, &mut addr, self.cpu())?;
            let pcb = k.current_mut();
            pcb.vidmap = true;
            let term = pcb.term;
            let target = if console.is_active(term) {
                VIDEO_PHYS
            } else {
                console.back_buffer_address(term)
            };
            k.paging.remap_video(pid, target, self.cpu())
        })?;
        out.write(addr);
        Ok(addr)
    }

    pub fn set_handler(&self, _signum: i32, _handler: usize) -> KResult<i32> {
        Ok(0)
    }

    pub fn sigreturn(&self) -> KResult<i32> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VIDMAP_VIRT, VIDEO_PAGE_INDEX};
    use crate::paging::PagingState;
    use crate::rtc::RTC_DEFAULT_RATE;
    use crate::testing;
    use std::boxed::Box;

    fn shell_system() -> System<testing::RecordingCpu> {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        system
    }

    #[test]
    fn read_and_write_reject_bad_descriptors() {
        let system = shell_system();
        let mut buf = [0u8; 4];
        for fd in [-1, 8, 9] {
            assert_eq!(system.read(fd, &mut buf), Err(KernelError::InvalidDescriptor));
            assert_eq!(system.write(fd, b"x"), Err(KernelError::InvalidDescriptor));
        }
        assert_eq!(system.read(1, &mut buf), Err(KernelError::InvalidDescriptor));
        assert_eq!(system.write(0, b"x"), Err(KernelError::InvalidDescriptor));
        assert_eq!(system.read(5, &mut buf), Err(KernelError::InvalidDescriptor));
    }

    #[test]
    fn zero_length_read_succeeds_and_write_fails() {
        let system = shell_system();
        assert_eq!(system.read(9, &mut []), Ok(0));
        assert_eq!(system.write(1, &[]), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn open_read_close_a_file() {
        let system = shell_system();
        let fd = system.open(b"frame0.txt").unwrap();
        assert_eq!(fd, 2);
        let mut buf = [0u8; 5];
        assert_eq!(system.read(fd as i32, &mut buf), Ok(5));
        assert_eq!(&buf, b"/\\/\\ ");
        assert_eq!(system.read(fd as i32, &mut buf), Ok(5));
        assert_eq!(&buf, b"fish\n");
        assert_eq!(system.write(fd as i32, b"x"), Err(KernelError::Unsupported));
        assert_eq!(system.close(fd as i32), Ok(()));
        assert_eq!(system.close(fd as i32), Err(KernelError::InvalidDescriptor));
    }

    #[test]
    fn seventh_open_fails() {
        let system = shell_system();
        for expected in 2..8 {
            assert_eq!(system.open(b"."), Ok(expected));
        }
        assert_eq!(system.open(b"."), Err(KernelError::Exhausted));
        assert_eq!(system.open(b"nonexistent"), Err(KernelError::NotFound));
    }

    #[test]
    fn close_rejects_stdio_and_out_of_range() {
        let system = shell_system();
        for fd in [0, 1, -1, 8] {
            assert_eq!(system.close(fd), Err(KernelError::InvalidDescriptor));
        }
    }

    #[test]
    fn stdout_write_reaches_terminal() {
        let system = shell_system();
        assert_eq!(system.write(1, b"391OS> "), Ok(7));
    }

    #[test]
    fn stdin_read_returns_typed_line() {
        let system = shell_system();
        for &b in b"hello\n" {
            system.console().handle_input(b);
        }
        let mut buf = [0u8; 32];
        assert_eq!(system.read(0, &mut buf), Ok(6));
        assert_eq!(&buf[..6], b"hello\n");
    }

    #[test]
    fn rtc_descriptor_caches_requested_rate() {
        let system = shell_system();
        let fd = system.open(b"rtc").unwrap();
        assert_eq!(system.rtc().rate(), RTC_DEFAULT_RATE);
        assert_eq!(system.write(fd as i32, &16i32.to_le_bytes()), Ok(0));
        assert_eq!(system.rtc().rate(), 16);
        system.with_kernel(|k| {
            assert_eq!(k.current().rtc_fd, Some(fd));
            assert_eq!(k.current().rtc_rate, 16);
        });
        assert_eq!(system.write(fd as i32, &3i32.to_le_bytes()), Err(KernelError::InvalidArgument));
        system.close(fd as i32).unwrap();
        system.with_kernel(|k| assert_eq!(k.current().rtc_fd, None));
    }

    #[test]
    fn rate_still_cached_after_closing_a_second_rtc_descriptor() {
        let system = shell_system();
        let first = system.open(b"rtc").unwrap();
        let second = system.open(b"rtc").unwrap();
        system.with_kernel(|k| assert_eq!(k.current().rtc_fd, Some(second)));
        system.close(second as i32).unwrap();

        assert_eq!(system.write(first as i32, &32i32.to_le_bytes()), Ok(0));
        system.with_kernel(|k| {
            assert_eq!(k.current().rtc_fd, Some(first));
            assert_eq!(k.current().rtc_rate, 32);
        });
    }

    #[test]
    fn directory_listing_through_descriptors() {
        let system = shell_system();
        let fd = system.open(b".").unwrap() as i32;
        let mut buf = [0u8; 32];
        let mut names = 0;
        while system.read(fd, &mut buf).unwrap() > 0 {
            names += 1;
        }
        assert_eq!(names, system.fs().entry_count());
    }

    #[test]
    fn getargs_copies_with_terminator() {
        let system = shell_system();
        system.execute(b"cat frame0.txt").unwrap();
        let mut buf = [0xFFu8; 32];
        assert_eq!(system.getargs(&mut buf), Ok(()));
        assert_eq!(&buf[..11], b"frame0.txt\0");

        let mut exact = [0u8; 10];
        assert_eq!(system.getargs(&mut exact), Ok(()));
        assert_eq!(&exact, b"frame0.txt");

        let mut short = [0u8; 4];
        assert_eq!(system.getargs(&mut short), Err(KernelError::OutOfRange));
        assert_eq!(system.getargs(&mut []), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn vidmap_rejects_kernel_pointers_without_side_effects() {
        let system = shell_system();
        unsafe {
            assert_eq!(system.vidmap(core::ptr::null_mut()), Err(KernelError::NullArgument));
            assert_eq!(system.vidmap(0x40_0000 as *mut usize), Err(KernelError::OutOfRange));
        }
        system.with_kernel(|k| {
            assert_eq!(k.paging().state(1), PagingState::Allocated);
            assert!(!k.current().vidmap);
        });
    }

    #[test]
    fn vidmap_on_active_terminal_maps_real_video() {
        let system = shell_system();
        let mut slot = Box::new(0usize);
        let addr = unsafe { system.vidmap(&mut *slot) };
        assert_eq!(addr, Ok(VIDMAP_VIRT));
        assert_eq!(*slot, VIDMAP_VIRT);
        system.with_kernel(|k| {
            assert!(k.current().vidmap);
            assert_eq!(k.paging().video_table(1).0[VIDEO_PAGE_INDEX] & !0xFFF, VIDEO_PHYS as u32);
        });
    }

    #[test]
    fn dispatch_folds_errors_to_minus_one() {
        let system = shell_system();
        unsafe {
            assert_eq!(system.dispatch(0, 0, 0, 0), -1);
            assert_eq!(system.dispatch(11, 0, 0, 0), -1);
            assert_eq!(system.dispatch(SYS_EXECUTE, 0, 0, 0), -1);
            assert_eq!(system.dispatch(SYS_READ, 0, 0, 4), -1);
            assert_eq!(system.dispatch(SYS_READ, 0, 0, 0), 0);
            assert_eq!(system.dispatch(SYS_GETARGS, 0, 16, 0), -1);
            assert_eq!(system.dispatch(SYS_SET_HANDLER, 2, 0, 0), 0);
            assert_eq!(system.dispatch(SYS_SIGRETURN, 0, 0, 0), 0);
        }
    }

    #[test]
    fn dispatch_reads_user_strings() {
        let system = shell_system();
        let name = b"frame0.txt\0";
        let fd = unsafe { system.dispatch(SYS_OPEN, name.as_ptr() as usize, 0, 0) };
        assert_eq!(fd, 2);
        let mut buf = [0u8; 4];
        let n = unsafe { system.dispatch(SYS_READ, fd as usize, buf.as_mut_ptr() as usize, buf.len()) };
        assert_eq!(n, 4);
        let msg = b"hi\n";
        let n = unsafe { system.dispatch(SYS_WRITE, 1, msg.as_ptr() as usize, msg.len()) };
        assert_eq!(n, 3);
        let cmd = b"ls\0";
        assert_eq!(unsafe { system.dispatch(SYS_EXECUTE, cmd.as_ptr() as usize, 0, 0) }, 0);
        assert_eq!(unsafe { system.dispatch(SYS_HALT, 0x1_05, 0, 0) }, 5);
    }
}

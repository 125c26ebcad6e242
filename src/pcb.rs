// pcb.rs
//! Process control blocks. Each one sits at the bottom of its PID's kernel
//! stack slot, so the running process can always be found from the stack
//! pointer alone.

use core::mem::size_of;
use core::ptr;

use crate::config::{ARGS_MAX, FD_COUNT, KERNEL_STACK_SIZE, MAX_PID, STDIN, STDOUT};
use crate::context::SavedContext;
use crate::device::{Device, FileCursor};
use crate::error::{KResult, KernelError};
use crate::task::{self, Pid};

/// Context state of a process, from launch to halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Created,
    Running,
    /// Preempted by the timer or waiting for a child to halt.
    Suspended,
    Halting,
}

impl ProcState {
    pub fn transition(self, to: ProcState) -> KResult<ProcState> {
        use ProcState::*;
        match (self, to) {
            (Created, Running) | (Running, Suspended) | (Suspended, Running) | (Running, Halting) => {
                Ok(to)
            }
            _ => Err(KernelError::InvalidState),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub device: Device,
    pub inode: u32,
    pub position: u32,
    /// Sole source of truth for whether the slot is open.
    pub in_use: bool,
}

impl FileDescriptor {
    pub const fn empty() -> Self {
        Self { device: Device::Terminal, inode: 0, position: 0, in_use: false }
    }

    const fn terminal() -> Self {
        Self { device: Device::Terminal, inode: 0, position: 0, in_use: true }
    }

    pub fn cursor(&self, term: usize) -> FileCursor {
        FileCursor { inode: self.inode, position: self.position, term }
    }
}

/// `context` comes first so the PCB address doubles as the saved context
/// address for the switch routines.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Pcb {
    /// Kernel context saved when this process last gave up the CPU.
    pub context: SavedContext,
    pub pid: Pid,
    pub state: ProcState,
    pub fds: [FileDescriptor; FD_COUNT],
    pub parent: Option<Pid>,
    pub child: Option<Pid>,
    pub term: usize,
    pub vidmap: bool,
    /// Descriptor index of the open RTC, if any, and the rate last written to it.
    pub rtc_fd: Option<usize>,
    pub rtc_rate: i32,
    args: [u8; ARGS_MAX],
    args_len: usize,
}

const _: () = assert!(size_of::<Pcb>() < KERNEL_STACK_SIZE / 4);

impl Pcb {
    pub const fn new(pid: Pid) -> Self {
        let mut fds = [FileDescriptor::empty(); FD_COUNT];
        fds[STDIN] = FileDescriptor::terminal();
        fds[STDOUT] = FileDescriptor::terminal();
        Self {
            pid,
            state: ProcState::Created,
            fds,
            context: SavedContext { esp: 0, ebp: 0 },
            parent: None,
            child: None,
            term: 0,
            vidmap: false,
            rtc_fd: None,
            rtc_rate: 0,
            args: [0; ARGS_MAX],
            args_len: 0,
        }
    }

    /// Closes every slot, then reopens stdin and stdout on the terminal.
    pub fn initialize(&mut self) {
        self.fds = [FileDescriptor::empty(); FD_COUNT];
        self.fds[STDIN] = FileDescriptor::terminal();
        self.fds[STDOUT] = FileDescriptor::terminal();
        self.rtc_fd = None;
    }

    /// Claims the lowest free slot in 2..8 for `device`.
    pub fn open_descriptor(&mut self, device: Device) -> KResult<usize> {
        let fd = (STDOUT + 1..FD_COUNT)
            .find(|&fd| !self.fds[fd].in_use)
            .ok_or(KernelError::Exhausted)?;
        self.fds[fd] = FileDescriptor { device, inode: 0, position: 0, in_use: true };
        Ok(fd)
    }

    /// Frees slot `fd` and returns what it held. Only the range is checked
    /// here; which slots user space may close is decided by the `close`
    /// syscall. If `fd` was the tracked RTC descriptor, tracking moves to
    /// another open RTC descriptor, if any.
    pub fn close_descriptor(&mut self, fd: usize) -> KResult<FileDescriptor> {
        let slot = self.fds.get_mut(fd).ok_or(KernelError::OutOfRange)?;
        let closed = *slot;
        *slot = FileDescriptor::empty();
        if self.rtc_fd == Some(fd) {
            self.rtc_fd = self.fds.iter().position(|d| d.in_use && d.device == Device::Rtc);
        }
        Ok(closed)
    }

    pub fn descriptor(&self, fd: usize) -> Option<&FileDescriptor> {
        self.fds.get(fd).filter(|d| d.in_use)
    }

    pub fn set_state(&mut self, to: ProcState) -> KResult<()> {
        self.state = self.state.transition(to)?;
        Ok(())
    }

    pub fn set_args(&mut self, args: &[u8]) -> KResult<()> {
        if args.len() > ARGS_MAX {
            return Err(KernelError::OutOfRange);
        }
        self.args[..args.len()].copy_from_slice(args);
        self.args_len = args.len();
        Ok(())
    }

    pub fn args(&self) -> &[u8] {
        &self.args[..self.args_len]
    }
}

/// The PCB store: `MAX_PID` stack slots ending at `top`.
pub struct KernelStacks {
    top: usize,
}

impl KernelStacks {
    /// # Safety
    /// `[top - MAX_PID * KERNEL_STACK_SIZE, top)` must be memory reserved
    /// for kernel stacks, with `top` aligned to `KERNEL_STACK_SIZE`.
    pub const unsafe fn new(top: usize) -> Self {
        Self { top }
    }

    pub fn address_of(&self, pid: Pid) -> usize {
        task::pcb_address(self.top, pid)
    }

    pub fn stack_top(&self, pid: Pid) -> usize {
        task::stack_top(self.top, pid)
    }

    /// PID whose slot holds `sp`, if it is inside the region at all.
    pub fn owner_of(&self, sp: usize) -> Option<Pid> {
        let bottom = self.top - MAX_PID * KERNEL_STACK_SIZE;
        if sp <= bottom || sp >= self.top {
            return None;
        }
        let slot = task::slot_of(sp);
        Some((self.top - KERNEL_STACK_SIZE - slot) / KERNEL_STACK_SIZE)
    }

    /// Writes a fresh PCB for `pid` into its slot.
    pub fn initialize(&mut self, pid: Pid) -> &mut Pcb {
        assert!(pid < MAX_PID);
        let pcb = self.address_of(pid) as *mut Pcb;
        unsafe {
            ptr::write(pcb, Pcb::new(pid));
            &mut *pcb
        }
    }

    /// The PCB of `pid`. Only valid once [`KernelStacks::initialize`] ran for it.
    pub fn get(&self, pid: Pid) -> &Pcb {
        assert!(pid < MAX_PID);
        unsafe { &*(self.address_of(pid) as *const Pcb) }
    }

    pub fn get_mut(&mut self, pid: Pid) -> &mut Pcb {
        assert!(pid < MAX_PID);
        unsafe { &mut *(self.address_of(pid) as *mut Pcb) }
    }

    pub fn context_ptr(&mut self, pid: Pid) -> *mut SavedContext {
        &mut self.get_mut(pid).context
    }
}

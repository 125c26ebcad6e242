// process.rs
//! Process lifetime: `execute` launches a child and waits for it, `halt`
//! tears the caller down and hands its status to the parent. Root shells
//! have no parent; halting one starts a fresh shell on the same terminal.

use core::slice;

use log::{debug, error, info, warn};

use crate::arch;
use crate::config::{ARGS_MAX, FD_COUNT, FILENAME_MAX, PROGRAM_IMAGE_MAX, PROGRAM_LOAD_ADDR, STDOUT, USER_STACK};
use crate::context::{Cpu, SavedContext};
use crate::device::Drivers;
use crate::error::{KResult, KernelError};
use crate::fs::{Dentry, FileSystem};
use crate::pcb::ProcState;
use crate::system::{Kernel, System};
use crate::task::Pid;

/// A command line split at its first space. The argument string is kept
/// verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a [u8],
    pub args: &'a [u8],
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a [u8]) -> KResult<Self> {
        let (name, args) = match line.iter().position(|&b| b == b' ') {
            Some(space) => (&line[..space], &line[space + 1..]),
            None => (line, &line[line.len()..]),
        };
        if name.is_empty() || name.len() > FILENAME_MAX {
            return Err(KernelError::NotFound);
        }
        if args.len() > ARGS_MAX {
            return Err(KernelError::OutOfRange);
        }
        Ok(Self { name, args })
    }
}

/// Everything needed to drop into a freshly loaded program.
#[derive(Debug)]
pub struct Launch {
    pub pid: Pid,
    pub entry: usize,
    pub user_stack: usize,
    /// Where the launching context is saved; `None` when nobody will ever
    /// return to it.
    save: Option<*mut SavedContext>,
}

#[derive(Debug)]
pub enum Exit {
    ToParent { parent: Pid, load: *const SavedContext, status: i32 },
    Respawn { term: usize },
}

impl Kernel {
    pub fn prepare_execute(&mut self, cpu: &impl Cpu, fs: &FileSystem, command: &[u8]) -> KResult<Launch> {
        let cmd = Command::parse(command)?;
        let dentry = executable(fs, cmd.name)?;
        let parent = self.scheduler.current();
        let term = self.stacks.get(parent).term;
        self.launch(cpu, fs, &dentry, cmd.args, Some(parent), term, true)
    }

    /// Root shell on `term`. With `save_caller` the interrupted context is
    /// kept so the scheduler can come back to it.
    pub fn prepare_root_shell(
        &mut self,
        cpu: &impl Cpu,
        fs: &FileSystem,
        shell: &[u8],
        term: usize,
        save_caller: bool,
    ) -> KResult<Launch> {
        let dentry = executable(fs, shell)?;
        self.launch(cpu, fs, &dentry, &[], None, term, save_caller)
    }

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &mut self,
        cpu: &impl Cpu,
        fs: &FileSystem,
        dentry: &Dentry,
        args: &[u8],
        parent: Option<Pid>,
        term: usize,
        save_caller: bool,
    ) -> KResult<Launch> {
        let caller = self.scheduler.current();
        let pid = self.tasks.allocate()?;

        let entry = match self.load_image(cpu, fs, dentry, pid) {
            Ok(entry) => entry,
            Err(e) => {
                self.abandon(cpu, pid, caller);
                return Err(e);
            }
        };
        if let Err(e) = self.stacks.initialize(pid).set_args(args) {
            self.abandon(cpu, pid, caller);
            return Err(e);
        }

        let pcb = self.stacks.get_mut(pid);
        pcb.parent = parent;
        pcb.term = term;
        pcb.set_state(ProcState::Running)?;

        self.scheduler.mark_runnable(pid);
        if let Some(parent) = parent {
            self.scheduler.mark_blocked(parent);
            self.stacks.get_mut(parent).child = Some(pid);
        }
        if save_caller {
            if let Err(e) = self.stacks.get_mut(caller).set_state(ProcState::Suspended) {
                warn!("launching pid {} from pid {}: {}", pid, caller, e);
            }
        }

        cpu.set_kernel_stack(self.stacks.stack_top(pid));
        let save = save_caller.then(|| self.stacks.context_ptr(caller));
        self.scheduler.set_current(pid);
        debug!("pid {} launched on terminal {} by {}", pid, term, caller);
        Ok(Launch { pid, entry, user_stack: USER_STACK, save })
    }

    /// Builds and activates `pid`'s address space and copies the program in.
    fn load_image(&mut self, cpu: &impl Cpu, fs: &FileSystem, dentry: &Dentry, pid: Pid) -> KResult<usize> {
        self.paging.allocate(pid)?;
        self.paging.switch_to(pid, cpu)?;
        let window = unsafe {
            slice::from_raw_parts_mut(cpu.user_memory(PROGRAM_LOAD_ADDR, PROGRAM_IMAGE_MAX), PROGRAM_IMAGE_MAX)
        };
        fs.load(dentry, window)
    }

    /// Undoes a launch that failed after `pid` was allocated.
    fn abandon(&mut self, cpu: &impl Cpu, pid: Pid, caller: Pid) {
        self.tasks.free(pid);
        self.paging.release(pid);
        if let Err(e) = self.paging.switch_to(caller, cpu) {
            warn!("pid {} has no address space to return to: {}", caller, e);
        }
    }

    /// Tears down the current process. `shell` is validated up front for a
    /// root shell so a broken image never leaves a terminal empty.
    pub fn prepare_halt(&mut self, cpu: &impl Cpu, drivers: &Drivers, shell: &[u8], status: u8) -> KResult<Exit> {
        let pid = self.scheduler.current();
        if pid == 0 {
            return Err(KernelError::InvalidState);
        }
        let (parent, term) = {
            let pcb = self.stacks.get(pid);
            (pcb.parent, pcb.term)
        };
        if parent.is_none() {
            executable(drivers.fs, shell)?;
        }

        let pcb = self.stacks.get_mut(pid);
        pcb.set_state(ProcState::Halting)?;
        for fd in STDOUT + 1..FD_COUNT {
            match pcb.close_descriptor(fd) {
                Ok(closed) if closed.in_use => {
                    if let Err(e) = drivers.close(closed.device, &mut closed.cursor(term)) {
                        debug!("pid {} fd {} close: {}", pid, fd, e);
                    }
                }
                _ => {}
            }
        }

        self.tasks.free(pid);
        self.scheduler.mark_blocked(pid);
        self.paging.release(pid);

        let Some(parent) = parent else {
            info!("root shell {} on terminal {} halted", pid, term);
            return Ok(Exit::Respawn { term });
        };

        self.paging.switch_to(parent, cpu)?;
        cpu.set_kernel_stack(self.stacks.stack_top(parent));
        let p = self.stacks.get_mut(parent);
        p.child = None;
        p.set_state(ProcState::Running)?;
        self.scheduler.mark_runnable(parent);
        self.scheduler.set_current(parent);
        debug!("pid {} halted with {}, back to {}", pid, status, parent);
        Ok(Exit::ToParent {
            parent,
            load: self.stacks.context_ptr(parent),
            status: i32::from(status),
        })
    }
}

fn executable(fs: &FileSystem, name: &[u8]) -> KResult<Dentry> {
    let dentry = fs.lookup_by_name(name)?;
    if !fs.is_executable(&dentry) {
        return Err(KernelError::NotExecutable);
    }
    Ok(dentry)
}

impl<C: Cpu> System<C> {
    /// Runs `command` as a child of the caller and returns its halt status.
    pub fn execute(&self, command: &[u8]) -> KResult<i32> {
        arch::without_interrupts(|| {
            let launch = self.with_kernel(|k| k.prepare_execute(self.cpu(), self.fs(), command))?;
            Ok(self.enter(&launch))
        })
    }

    /// Halts the caller. On hardware this never returns to it.
    pub fn halt(&self, status: u8) -> KResult<i32> {
        arch::without_interrupts(|| {
            let shell = self.config().shell();
            let exit = self.with_kernel(|k| k.prepare_halt(self.cpu(), &self.drivers(), shell, status))?;
            match exit {
                Exit::ToParent { load, status, .. } => {
                    unsafe { self.cpu().resume(load, status) };
                    Ok(status)
                }
                Exit::Respawn { term } => match self.start_shell(term, false) {
                    Ok(status) => Ok(status),
                    Err(e) => {
                        error!("terminal {} lost its shell: {}", term, e);
                        // the caller is already gone; nothing to return to
                        arch::idle();
                        Err(e)
                    }
                },
            }
        })
    }

    /// Opens `term` and starts a root shell on it, saving the caller so the
    /// scheduler can resume it later.
    pub fn launch_root_shell(&self, term: usize) -> KResult<i32> {
        self.start_shell(term, true)
    }

    fn start_shell(&self, term: usize, save_caller: bool) -> KResult<i32> {
        arch::without_interrupts(|| {
            self.console().open_terminal(term)?;
            self.console().mark_launched(term);
            let shell = self.config().shell();
            let launch =
                self.with_kernel(|k| k.prepare_root_shell(self.cpu(), self.fs(), shell, term, save_caller))?;
            info!("shell pid {} on terminal {}", launch.pid, term);
            Ok(self.enter(&launch))
        })
    }

    fn enter(&self, launch: &Launch) -> i32 {
        let mut discarded = SavedContext::default();
        let save = launch.save.unwrap_or(&mut discarded);
        unsafe { self.cpu().enter_user(save, launch.entry, launch.user_stack) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::testing::{self, CpuEvent};

    #[test]
    fn command_splits_at_first_space_only() {
        assert_eq!(Command::parse(b"cat frame0.txt"), Ok(Command { name: b"cat", args: b"frame0.txt" }));
        assert_eq!(Command::parse(b"grep a  b"), Ok(Command { name: b"grep", args: b"a  b" }));
        assert_eq!(Command::parse(b"ls"), Ok(Command { name: b"ls", args: b"" }));
        assert_eq!(Command::parse(b" ls"), Err(KernelError::NotFound));
        assert_eq!(Command::parse(b""), Err(KernelError::NotFound));
    }

    #[test]
    fn command_limits() {
        let mut long = [b'a'; 40];
        long[33] = b' ';
        assert_eq!(Command::parse(&long), Err(KernelError::NotFound));
        let mut line = std::vec::Vec::from(&b"cat "[..]);
        line.extend_from_slice(&[b'x'; ARGS_MAX + 1]);
        assert_eq!(Command::parse(&line), Err(KernelError::OutOfRange));
    }

    #[test]
    fn boot_shell_becomes_pid_one() {
        let system = testing::system();
        assert_eq!(system.launch_root_shell(0), Ok(0));
        system.with_kernel(|k| {
            assert_eq!(k.current_pid(), 1);
            assert!(k.scheduler().is_runnable(1));
            assert_eq!(k.pcb(1).parent, None);
            assert_eq!(k.pcb(1).state, ProcState::Running);
        });
        assert!(system.cpu().events().contains(&CpuEvent::EnterUser {
            entry: testing::SHELL_ENTRY,
            stack: USER_STACK,
        }));
    }

    #[test]
    fn execute_records_parent_and_child() {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        assert_eq!(system.execute(b"cat frame0.txt"), Ok(0));
        system.with_kernel(|k| {
            assert_eq!(k.current_pid(), 2);
            assert_eq!(k.pcb(2).parent, Some(1));
            assert_eq!(k.pcb(1).child, Some(2));
            assert_eq!(k.pcb(2).args(), b"frame0.txt");
            assert!(!k.scheduler().is_runnable(1));
            assert!(k.scheduler().is_runnable(2));
            assert_eq!(k.pcb(1).state, ProcState::Suspended);
        });
        let top = system.with_kernel(|k| k.stacks().stack_top(2));
        assert!(system.cpu().events().contains(&CpuEvent::KernelStack(top)));
    }

    #[test]
    fn halt_returns_status_to_parent() {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        system.execute(b"ls").unwrap();
        system.cpu().clear();

        assert_eq!(system.halt(7), Ok(7));
        let (dir1, top1, ctx1) = system.with_kernel(|k| {
            assert_eq!(k.current_pid(), 1);
            assert!(k.scheduler().is_runnable(1));
            assert!(!k.scheduler().is_runnable(2));
            assert!(!k.tasks().is_in_use(2));
            assert_eq!(k.pcb(1).child, None);
            assert_eq!(k.pcb(1).state, ProcState::Running);
            (k.paging().directory_address(1), k.stacks().stack_top(1), k.stacks().address_of(1))
        });
        let events = system.cpu().events();
        assert!(events.contains(&CpuEvent::LoadDirectory(dir1)));
        assert!(events.contains(&CpuEvent::KernelStack(top1)));
        assert_eq!(events.last(), Some(&CpuEvent::Resume { load: ctx1, status: 7 }));
    }

    #[test]
    fn halt_closes_open_files() {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        system.execute(b"ls").unwrap();
        let fd = system.open(b"rtc").unwrap();
        system.with_kernel(|k| assert_eq!(k.pcb(2).fds[fd].device, Device::Rtc));
        system.halt(0).unwrap();
        // the slot is free for the next child
        system.execute(b"ls").unwrap();
        system.with_kernel(|k| assert!(k.pcb(2).fds[2..].iter().all(|d| !d.in_use)));
    }

    #[test]
    fn failed_magic_check_allocates_nothing() {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        let before = system.with_kernel(|k| k.tasks().in_use_count());
        assert_eq!(system.execute(b"frame0.txt"), Err(KernelError::NotExecutable));
        assert_eq!(system.execute(b"missing"), Err(KernelError::NotFound));
        system.with_kernel(|k| {
            assert_eq!(k.tasks().in_use_count(), before);
            assert_eq!(k.current_pid(), 1);
        });
    }

    #[test]
    fn loader_failure_frees_pid_and_restores_caller() {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        system.cpu().clear();
        assert_eq!(system.execute(b"stub"), Err(KernelError::NotExecutable));
        let dir1 = system.with_kernel(|k| {
            assert_eq!(k.tasks().in_use_count(), 1);
            assert!(!k.tasks().is_in_use(2));
            assert_eq!(k.current_pid(), 1);
            assert!(k.scheduler().is_runnable(1));
            k.paging().directory_address(1)
        });
        assert_eq!(system.cpu().events().last(), Some(&CpuEvent::LoadDirectory(dir1)));
    }

    #[test]
    fn execute_fails_when_pids_run_out() {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        for _ in 2..crate::config::MAX_PID {
            system.execute(b"ls").unwrap();
        }
        assert_eq!(system.execute(b"ls"), Err(KernelError::Exhausted));
        assert_eq!(system.with_kernel(|k| k.current_pid()), crate::config::MAX_PID - 1);
    }

    #[test]
    fn halting_root_shell_respawns_on_same_terminal() {
        let system = testing::system();
        system.launch_root_shell(0).unwrap();
        system.launch_root_shell(1).unwrap();
        assert_eq!(system.halt(0), Ok(0));
        system.with_kernel(|k| {
            let pid = k.current_pid();
            assert_eq!(pid, 2);
            assert_eq!(k.pcb(pid).term, 1);
            assert_eq!(k.pcb(pid).parent, None);
            assert_eq!(k.tasks().in_use_count(), 2);
        });
    }

    #[test]
    fn halt_from_boot_context_is_rejected() {
        let system = testing::system();
        assert_eq!(system.halt(0), Err(KernelError::InvalidState));
    }
}

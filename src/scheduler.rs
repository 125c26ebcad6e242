// scheduler.rs
//! Preemptive round-robin over the runnable PIDs, driven by the PIT.

use log::{trace, warn};

use crate::arch;
use crate::config::{MAX_PID, VIDEO_PHYS};
use crate::context::{Cpu, SavedContext};
use crate::error::{KResult, KernelError};
use crate::paging::PagingState;
use crate::pcb::ProcState;
use crate::system::{Kernel, System};
use crate::task::Pid;
use crate::vga::Console;

pub struct Scheduler {
    runnable: [bool; MAX_PID],
    current: Pid,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self { runnable: [false; MAX_PID], current: 0 }
    }

    pub fn mark_runnable(&mut self, pid: Pid) {
        if pid < MAX_PID {
            self.runnable[pid] = true;
        }
    }

    pub fn mark_blocked(&mut self, pid: Pid) {
        if pid < MAX_PID {
            self.runnable[pid] = false;
        }
    }

    pub fn is_runnable(&self, pid: Pid) -> bool {
        pid < MAX_PID && self.runnable[pid]
    }

    pub fn any_runnable(&self) -> bool {
        self.runnable.iter().any(|&r| r)
    }

    pub fn current(&self) -> Pid {
        self.current
    }

    pub fn set_current(&mut self, pid: Pid) {
        self.current = pid;
    }

    /// First runnable PID after `current`, wrapping around; `current`
    /// itself when nothing else is runnable.
    pub fn next_after(&self, current: Pid) -> Pid {
        (1..MAX_PID)
            .map(|step| (current + step) % MAX_PID)
            .find(|&pid| self.runnable[pid])
            .unwrap_or(current)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers to save and restore once the kernel lock is released.
#[derive(Debug, Clone, Copy)]
pub struct ContextSwitch {
    pub from: Pid,
    pub to: Pid,
    save: *mut SavedContext,
    load: *const SavedContext,
}

impl Kernel {
    /// Picks the next process and prepares the machine for it: its video
    /// page, its kernel stack in the TSS and its page directory.
    pub fn tick(&mut self, cpu: &impl Cpu, console: &Console) -> KResult<Option<ContextSwitch>> {
        if !self.scheduler.any_runnable() {
            return Ok(None);
        }
        let current = self.scheduler.current();
        let next = self.scheduler.next_after(current);
        if self.paging.state(next) == PagingState::Unallocated {
            return Err(KernelError::InvalidState);
        }

        if next != current {
            if let Err(e) = self.stacks.get_mut(current).set_state(ProcState::Suspended) {
                warn!("pid {} preempted while not running: {}", current, e);
            }
            if let Err(e) = self.stacks.get_mut(next).set_state(ProcState::Running) {
                warn!("pid {} dispatched from bad state: {}", next, e);
            }
        }

        let term = self.stacks.get(next).term;
        let video = if console.is_active(term) {
            VIDEO_PHYS
        } else {
            console.back_buffer_address(term)
        };
        self.paging.remap_video(next, video, cpu)?;
        cpu.set_kernel_stack(self.stacks.stack_top(next));
        self.paging.switch_to(next, cpu)?;
        self.scheduler.set_current(next);

        trace!("tick: {} -> {}", current, next);
        Ok(Some(ContextSwitch {
            from: current,
            to: next,
            save: self.stacks.context_ptr(current),
            load: self.stacks.context_ptr(next),
        }))
    }
}

impl<C: Cpu> System<C> {
    /// Body of the timer interrupt; the PIC has already been acknowledged.
    pub fn timer_tick(&self) {
        if let Some(term) = self.console().take_shell_request() {
            // returns once this process is scheduled again
            if let Err(e) = self.launch_root_shell(term) {
                warn!("could not start shell on terminal {}: {}", term, e);
            }
            return;
        }

        let plan = arch::without_interrupts(|| match self.try_kernel() {
            Some(mut kernel) => kernel.tick(self.cpu(), self.console()),
            None => {
                trace!("tick skipped, kernel busy");
                Ok(None)
            }
        });
        match plan {
            Ok(Some(switch)) => unsafe { self.cpu().context_switch(switch.save, switch.load) },
            Ok(None) => {}
            Err(e) => warn!("scheduler tick failed: {}", e),
        }
    }
}

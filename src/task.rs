// task.rs
//! PID pool and the arithmetic of the per-PID kernel stack region.
//!
//! The region below `KERNEL_MEM_END` is carved into `KERNEL_STACK_SIZE`
//! slots, one per PID, stacked downward: PID 0 owns the topmost slot. The
//! PCB lives at the bottom of its slot and the stack grows toward it.

use log::trace;

use crate::config::{KERNEL_STACK_SIZE, MAX_PID};
use crate::error::{KResult, KernelError};

pub type Pid = usize;

pub struct TaskRegistry {
    in_use: [bool; MAX_PID],
}

impl TaskRegistry {
    pub const fn new() -> Self {
        Self { in_use: [false; MAX_PID] }
    }

    /// First-fit over 1..MAX_PID. PID 0 is reserved for the boot context.
    pub fn allocate(&mut self) -> KResult<Pid> {
        let pid = (1..MAX_PID)
            .find(|&pid| !self.in_use[pid])
            .ok_or(KernelError::Exhausted)?;
        self.in_use[pid] = true;
        trace!("allocated pid {}", pid);
        Ok(pid)
    }

    /// Out-of-range PIDs are ignored.
    pub fn free(&mut self, pid: Pid) {
        if (1..MAX_PID).contains(&pid) {
            self.in_use[pid] = false;
            trace!("freed pid {}", pid);
        }
    }

    pub fn is_in_use(&self, pid: Pid) -> bool {
        pid < MAX_PID && self.in_use[pid]
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.iter().filter(|&&used| used).count()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Initial `esp0` for `pid`: the exclusive top of its stack slot.
pub const fn stack_top(region_top: usize, pid: Pid) -> usize {
    region_top - pid * KERNEL_STACK_SIZE
}

/// Bottom of `pid`'s slot, where its PCB is stored.
pub const fn pcb_address(region_top: usize, pid: Pid) -> usize {
    (region_top - 1 - pid * KERNEL_STACK_SIZE) & !(KERNEL_STACK_SIZE - 1)
}

/// Slot base holding a live stack pointer. `sp` must be strictly inside a
/// slot, which holds for any pointer taken inside a function.
pub const fn slot_of(sp: usize) -> usize {
    sp & !(KERNEL_STACK_SIZE - 1)
}

// system.rs
//! The one top-level kernel object. It owns every global table behind a
//! single lock, plus the drivers that synchronise themselves.

use spin::{Mutex, MutexGuard};

use crate::arch;
use crate::config::KernelConfig;
use crate::context::Cpu;
use crate::device::Drivers;
use crate::fs::FileSystem;
use crate::paging::{PageTables, PagingManager};
use crate::pcb::{KernelStacks, Pcb, ProcState};
use crate::rtc::Rtc;
use crate::scheduler::Scheduler;
use crate::task::{Pid, TaskRegistry};
use crate::vga::Console;

/// Process and memory bookkeeping. Only ever touched with interrupts off.
pub struct Kernel {
    pub(crate) tasks: TaskRegistry,
    pub(crate) stacks: KernelStacks,
    pub(crate) paging: PagingManager,
    pub(crate) scheduler: Scheduler,
}

impl Kernel {
    pub fn new(tables: &'static mut PageTables, mut stacks: KernelStacks) -> Self {
        // PID 0 is whoever called us: the boot path on the topmost stack
        stacks.initialize(0).state = ProcState::Running;
        Self {
            tasks: TaskRegistry::new(),
            stacks,
            paging: PagingManager::new(tables),
            scheduler: Scheduler::new(),
        }
    }

    pub fn init_paging(&mut self, cpu: &impl Cpu) {
        self.paging.init(cpu);
    }

    pub fn current_pid(&self) -> Pid {
        self.scheduler.current()
    }

    pub fn current(&self) -> &Pcb {
        self.stacks.get(self.scheduler.current())
    }

    pub fn current_mut(&mut self) -> &mut Pcb {
        self.stacks.get_mut(self.scheduler.current())
    }

    pub fn pcb(&self, pid: Pid) -> &Pcb {
        self.stacks.get(pid)
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn stacks(&self) -> &KernelStacks {
        &self.stacks
    }

    pub fn paging(&self) -> &PagingManager {
        &self.paging
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

pub struct System<C: Cpu> {
    cpu: C,
    kernel: Mutex<Kernel>,
    fs: FileSystem<'static>,
    console: &'static Console,
    rtc: &'static Rtc,
    config: KernelConfig,
}

impl<C: Cpu> System<C> {
    pub fn new(
        cpu: C,
        kernel: Kernel,
        fs: FileSystem<'static>,
        console: &'static Console,
        rtc: &'static Rtc,
        config: KernelConfig,
    ) -> Self {
        Self { cpu, kernel: Mutex::new(kernel), fs, console, rtc, config }
    }

    /// Runs `f` on the kernel tables with interrupts disabled.
    pub fn with_kernel<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> R {
        arch::without_interrupts(|| f(&mut self.kernel.lock()))
    }

    /// Interrupt-context access; `None` if somebody holds the lock.
    pub fn try_kernel(&self) -> Option<MutexGuard<'_, Kernel>> {
        self.kernel.try_lock()
    }

    pub fn drivers(&self) -> Drivers<'_> {
        Drivers { fs: &self.fs, console: self.console, rtc: self.rtc }
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn fs(&self) -> &FileSystem<'static> {
        &self.fs
    }

    pub fn console(&self) -> &'static Console {
        self.console
    }

    pub fn rtc(&self) -> &'static Rtc {
        self.rtc
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub static SYSTEM: spin::Once<System<crate::context::X86Cpu>> = spin::Once::new();

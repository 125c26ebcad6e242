// arch/mod.rs
//! Processor primitives. On the bare-metal i686 target these are real
//! instructions; hosted builds get inert stand-ins so the kernel logic can
//! run under the test harness.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86::{inb, outb};

/// Runs `f` with maskable interrupts off, restoring the previous state.
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        let enabled = x86::interrupts_enabled();
        if enabled {
            x86::disable_interrupts();
        }
        let ret = f();
        if enabled {
            x86::enable_interrupts();
        }
        ret
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        f()
    }
}

/// Sleeps until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    x86::hlt();
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    core::hint::spin_loop();
}

/// Parks the current context forever with interrupts on, leaving the CPU
/// to the scheduler. Hosted builds return immediately.
pub fn idle() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        x86::enable_interrupts();
        loop {
            x86::hlt();
        }
    }
}

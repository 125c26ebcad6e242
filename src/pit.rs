// pit.rs
//! Channel 0 of the 8253/8254 drives the scheduler tick on IRQ 0.

use core::sync::atomic::{AtomicU32, Ordering};

use log::debug;

#[cfg(all(target_arch = "x86", target_os = "none"))]
use crate::arch;

#[cfg(all(target_arch = "x86", target_os = "none"))]
const PIT_CHANNEL0: u16 = 0x40;
#[cfg(all(target_arch = "x86", target_os = "none"))]
const PIT_COMMAND: u16 = 0x43;
const PIT_FREQ: u32 = 1_193_182; // Hz base

static TICK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Reload value for `hz`; 0 means 65536 to the chip.
pub fn divisor(hz: u32) -> Option<u16> {
    if hz == 0 {
        return None;
    }
    let div = PIT_FREQ / hz;
    match div {
        0 => None,
        1..=0xFFFF => Some(div as u16),
        0x10000 => Some(0),
        _ => None,
    }
}

pub fn init(hz: u32) -> bool {
    let Some(div) = divisor(hz) else {
        return false;
    };
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        arch::outb(PIT_COMMAND, 0x34); // channel 0, lobyte/hibyte, mode 2
        arch::outb(PIT_CHANNEL0, (div & 0xFF) as u8);
        arch::outb(PIT_CHANNEL0, (div >> 8) as u8);
    }
    debug!("pit at {} Hz (divisor {})", hz, div);
    true
}

pub fn tick() -> u32 {
    TICK_COUNT.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
}

pub fn ticks() -> u32 {
    TICK_COUNT.load(Ordering::SeqCst)
}

// rtc.rs
//! Real-time clock on IRQ 8: periodic interrupts at a power-of-two rate
//! and a blocking read that returns once per interrupt.

use core::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use crate::arch;
use crate::device::{FileCursor, FileOperations};
use crate::error::{KResult, KernelError};

pub const RTC_MIN_RATE: i32 = 2;
pub const RTC_MAX_RATE: i32 = 1024;
pub const RTC_DEFAULT_RATE: i32 = 2;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod port {
    pub const INDEX: u16 = 0x70;
    pub const DATA: u16 = 0x71;
    // high bit keeps NMI disabled while the index is selected
    pub const REG_A: u8 = 0x8A;
    pub const REG_B: u8 = 0x8B;
    pub const REG_C: u8 = 0x0C;
}

pub struct Rtc {
    generation: AtomicU32,
    rate: AtomicU32,
}

/// Register-A divider selecting `rate` Hz, or `None` unless the rate is a
/// power of two in 2..=1024.
pub fn divider(rate: i32) -> Option<u8> {
    if !(RTC_MIN_RATE..=RTC_MAX_RATE).contains(&rate) || rate.count_ones() != 1 {
        return None;
    }
    Some(16 - rate.trailing_zeros() as u8)
}

impl Rtc {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            rate: AtomicU32::new(RTC_DEFAULT_RATE as u32),
        }
    }

    /// Turns on periodic interrupts at the default rate.
    pub fn init(&self) -> KResult<()> {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        arch::without_interrupts(|| unsafe {
            arch::outb(port::INDEX, port::REG_B);
            let prev = arch::inb(port::DATA);
            arch::outb(port::INDEX, port::REG_B);
            arch::outb(port::DATA, prev | 0x40);
        });
        self.set_rate(RTC_DEFAULT_RATE)
    }

    pub fn set_rate(&self, rate: i32) -> KResult<()> {
        let div = divider(rate).ok_or(KernelError::InvalidArgument)?;
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        arch::without_interrupts(|| unsafe {
            arch::outb(port::INDEX, port::REG_A);
            let prev = arch::inb(port::DATA);
            arch::outb(port::INDEX, port::REG_A);
            arch::outb(port::DATA, (prev & 0xF0) | div);
        });
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        let _ = div;
        self.rate.store(rate as u32, Ordering::Relaxed);
        debug!("rtc rate {} Hz", rate);
        Ok(())
    }

    pub fn rate(&self) -> i32 {
        self.rate.load(Ordering::Relaxed) as i32
    }

    /// IRQ 8 body. Register C must be read or the chip stops interrupting.
    pub fn interrupt(&self) {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        unsafe {
            arch::outb(port::INDEX, port::REG_C);
            let _ = arch::inb(port::DATA);
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Blocks until an interrupt arrives after `seen` was sampled.
    pub fn wait_after(&self, seen: u32) {
        while self.generation() == seen {
            arch::wait_for_interrupt();
        }
    }
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

impl FileOperations for Rtc {
    fn open(&self, _name: &[u8]) -> KResult<()> {
        self.set_rate(RTC_DEFAULT_RATE)
    }

    fn read(&self, _file: &mut FileCursor, _buf: &mut [u8]) -> KResult<usize> {
        self.wait_after(self.generation());
        Ok(0)
    }

    fn write(&self, _file: &mut FileCursor, buf: &[u8]) -> KResult<usize> {
        let raw: [u8; 4] = buf
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(KernelError::InvalidArgument)?;
        self.set_rate(i32::from_le_bytes(raw))?;
        Ok(0)
    }

    fn close(&self, _file: &mut FileCursor) -> KResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn divider_for_valid_rates() {
        assert_eq!(divider(2), Some(15));
        assert_eq!(divider(1024), Some(6));
        assert_eq!(divider(64), Some(10));
    }

    #[test]
    fn rejects_rates_outside_range_or_not_power_of_two() {
        for rate in [0, 1, 3, 100, 2048, -2] {
            assert_eq!(divider(rate), None, "rate {}", rate);
        }
        let rtc = Rtc::new();
        assert_eq!(rtc.set_rate(1000), Err(KernelError::InvalidArgument));
        assert_eq!(rtc.rate(), RTC_DEFAULT_RATE);
    }

    #[test]
    fn write_sets_rate_and_open_restores_default() {
        let rtc = Rtc::new();
        let mut cursor = FileCursor::default();
        assert_eq!(rtc.write(&mut cursor, &32i32.to_le_bytes()), Ok(0));
        assert_eq!(rtc.rate(), 32);
        assert_eq!(rtc.write(&mut cursor, &[1, 0]), Err(KernelError::InvalidArgument));
        rtc.open(b"rtc").unwrap();
        assert_eq!(rtc.rate(), 2);
    }

    #[test]
    fn reader_is_released_only_by_a_later_interrupt() {
        let rtc = Arc::new(Rtc::new());
        rtc.interrupt();
        let seen = rtc.generation();
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let rtc = Arc::clone(&rtc);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                rtc.wait_after(seen);
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!done.load(Ordering::SeqCst));
        rtc.interrupt();
        reader.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }
}

// logger.rs
//! `log` backend writing one line per record to a byte sink, normally the
//! COM1 serial port.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::arch;

pub struct KernelLogger<S> {
    sink: Mutex<Option<S>>,
    /// `LevelFilter as usize`; read from interrupt context, so never locked.
    level: AtomicUsize,
}

impl<S: Write + Send> KernelLogger<S> {
    pub const fn new() -> Self {
        Self { sink: Mutex::new(None), level: AtomicUsize::new(LevelFilter::Info as usize) }
    }

    /// Installs `sink`; records logged before this are dropped.
    pub fn attach(&self, sink: S, level: LevelFilter) {
        arch::without_interrupts(|| {
            *self.sink.lock() = Some(sink);
        });
        self.level.store(level as usize, Ordering::Relaxed);
    }

    pub fn level(&self) -> LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn emit(&self, record: &Record) -> fmt::Result {
        arch::without_interrupts(|| {
            let mut sink = self.sink.lock();
            let Some(out) = sink.as_mut() else {
                return Ok(());
            };
            writeln!(out, "[{:<5}] {}: {}", record.level(), record.target(), record.args())
        })
    }
}

impl<S: Write + Send> Default for KernelLogger<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Write + Send> Log for KernelLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self.emit(record);
        }
    }

    fn flush(&self) {}
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub static LOGGER: KernelLogger<crate::serial::SerialPort> = KernelLogger::new();

/// Routes the `log` macros to COM1 at `level`.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init(level: LevelFilter) {
    LOGGER.attach(crate::serial::SerialPort::com1(), level);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

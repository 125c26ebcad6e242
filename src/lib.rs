#![cfg_attr(not(test), no_std)]

#[cfg(test)]
extern crate std;

pub mod arch;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod fs;
pub mod kb;
pub mod logger;
pub mod paging;
pub mod pcb;
pub mod pit;
pub mod process;
pub mod rtc;
pub mod scheduler;
pub mod syscall;
pub mod system;
pub mod task;
pub mod vga;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod interrupts;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod serial;

#[cfg(test)]
mod testing;

pub use error::{KResult, KernelError};
pub use system::{Kernel, System};
pub use task::Pid;

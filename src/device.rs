// device.rs
//! The closed set of things a descriptor can refer to, and the four
//! operations each of them answers to.

use crate::error::KResult;
use crate::fs::{Directory, FileSystem, FileType, RegularFile};
use crate::rtc::Rtc;
use crate::vga::Console;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    File,
    Directory,
    Rtc,
    Terminal,
}

impl From<FileType> for Device {
    fn from(kind: FileType) -> Self {
        match kind {
            FileType::Rtc => Device::Rtc,
            FileType::Directory => Device::Directory,
            FileType::Regular => Device::File,
        }
    }
}

/// Per-descriptor state a driver may read or advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCursor {
    pub inode: u32,
    pub position: u32,
    /// Terminal the owning process is attached to.
    pub term: usize,
}

pub trait FileOperations {
    fn open(&self, name: &[u8]) -> KResult<()>;
    fn read(&self, file: &mut FileCursor, buf: &mut [u8]) -> KResult<usize>;
    fn write(&self, file: &mut FileCursor, buf: &[u8]) -> KResult<usize>;
    fn close(&self, file: &mut FileCursor) -> KResult<()>;
}

/// Borrowed view over every driver, routed by `Device`.
#[derive(Clone, Copy)]
pub struct Drivers<'a> {
    pub fs: &'a FileSystem<'a>,
    pub console: &'a Console,
    pub rtc: &'a Rtc,
}

impl<'a> Drivers<'a> {
    pub fn with_ops<R>(&self, device: Device, f: impl FnOnce(&dyn FileOperations) -> R) -> R {
        match device {
            Device::File => f(&RegularFile(self.fs)),
            Device::Directory => f(&Directory(self.fs)),
            Device::Rtc => f(self.rtc),
            Device::Terminal => f(self.console),
        }
    }

    pub fn open(&self, device: Device, name: &[u8]) -> KResult<()> {
        self.with_ops(device, |ops| ops.open(name))
    }

    pub fn read(&self, device: Device, file: &mut FileCursor, buf: &mut [u8]) -> KResult<usize> {
        self.with_ops(device, |ops| ops.read(file, buf))
    }

    pub fn write(&self, device: Device, file: &mut FileCursor, buf: &[u8]) -> KResult<usize> {
        self.with_ops(device, |ops| ops.write(file, buf))
    }

    pub fn close(&self, device: Device, file: &mut FileCursor) -> KResult<()> {
        self.with_ops(device, |ops| ops.close(file))
    }
}

// paging.rs
//! Per-process address spaces built from static tables.
//!
//! Directory entry 0 points at a low page table shared by everybody in
//! which only the video page is present. Entry 1 is the global 4MB kernel
//! page. Each process gets a 4MB program page at entry 32 and, after
//! `vidmap`, a private page table at entry 31 exposing one 4KB video page.

use log::{debug, trace};
use x86_64::structures::paging::PageTableFlags;

use crate::config::{
    KERNEL_PAGE_BASE, LARGE_PAGE_SIZE, MAX_PID, PROGRAM_DIR_INDEX, VIDEO_PAGE_INDEX, VIDEO_PHYS,
    VIDMAP_DIR_INDEX, VIDMAP_VIRT,
};
use crate::context::Cpu;
use crate::error::{KResult, KernelError};
use crate::task::Pid;

pub const ENTRIES: usize = 1024;

// 32-bit entries share the low flag bits with the long-mode layout.
const PRESENT: u32 = PageTableFlags::PRESENT.bits() as u32;
const WRITABLE: u32 = PageTableFlags::WRITABLE.bits() as u32;
const USER: u32 = PageTableFlags::USER_ACCESSIBLE.bits() as u32;
const LARGE: u32 = PageTableFlags::HUGE_PAGE.bits() as u32;
const GLOBAL: u32 = PageTableFlags::GLOBAL.bits() as u32;
const ADDRESS_MASK: u32 = !0xFFF;

const KERNEL_DIR_INDEX: usize = KERNEL_PAGE_BASE / LARGE_PAGE_SIZE;

#[repr(C, align(4096))]
#[derive(Clone, Copy)]
pub struct PageTable(pub [u32; ENTRIES]);

impl PageTable {
    pub const fn zeroed() -> Self {
        Self([0; ENTRIES])
    }

    fn address(&self) -> u32 {
        self as *const Self as usize as u32
    }
}

/// Backing storage for every table, placed in `.bss` on hardware.
pub struct PageTables {
    directories: [PageTable; MAX_PID],
    low: PageTable,
    video: [PageTable; MAX_PID],
}

impl PageTables {
    pub const fn new() -> Self {
        Self {
            directories: [PageTable::zeroed(); MAX_PID],
            low: PageTable::zeroed(),
            video: [PageTable::zeroed(); MAX_PID],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingState {
    Unallocated,
    Allocated,
    VideoMapped,
}

pub struct PagingManager {
    tables: &'static mut PageTables,
    state: [PagingState; MAX_PID],
}

impl PagingManager {
    pub fn new(tables: &'static mut PageTables) -> Self {
        Self { tables, state: [PagingState::Unallocated; MAX_PID] }
    }

    /// Builds the shared low table and the boot directory (PID 0) and
    /// turns paging on.
    pub fn init(&mut self, cpu: &impl Cpu) {
        for (i, entry) in self.tables.low.0.iter_mut().enumerate() {
            *entry = (i as u32) << 12;
        }
        self.tables.low.0[VIDEO_PAGE_INDEX] = VIDEO_PHYS as u32 | WRITABLE | PRESENT;
        self.fill_directory(0);
        self.state[0] = PagingState::Allocated;
        cpu.load_page_directory(self.directory_address(0));
        debug!("paging on, boot directory at {:#x}", self.directory_address(0));
    }

    /// Fills `pid`'s directory: shared kernel entries plus its program page
    /// at physical `(pid + 1) * 4MB`.
    pub fn allocate(&mut self, pid: Pid) -> KResult<()> {
        if pid == 0 || pid >= MAX_PID {
            return Err(KernelError::OutOfRange);
        }
        self.fill_directory(pid);
        self.tables.directories[pid].0[PROGRAM_DIR_INDEX] =
            ((pid + 1) * LARGE_PAGE_SIZE) as u32 | LARGE | USER | WRITABLE | PRESENT;
        self.tables.video[pid] = PageTable::zeroed();
        self.state[pid] = PagingState::Allocated;
        trace!("directory {} program page at {:#x}", pid, (pid + 1) * LARGE_PAGE_SIZE);
        Ok(())
    }

    pub fn release(&mut self, pid: Pid) {
        if (1..MAX_PID).contains(&pid) {
            self.state[pid] = PagingState::Unallocated;
        }
    }

    pub fn switch_to(&self, pid: Pid, cpu: &impl Cpu) -> KResult<()> {
        if pid >= MAX_PID {
            return Err(KernelError::OutOfRange);
        }
        if self.state[pid] == PagingState::Unallocated {
            return Err(KernelError::InvalidState);
        }
        cpu.load_page_directory(self.directory_address(pid));
        Ok(())
    }

    /// Exposes real video memory to `pid` and stores the user address of it
    /// in `out`.
    pub fn map_video(&mut self, pid: Pid, out: &mut usize, cpu: &impl Cpu) -> KResult<()> {
        if pid == 0 || pid >= MAX_PID {
            return Err(KernelError::OutOfRange);
        }
        if self.state[pid] == PagingState::Unallocated {
            return Err(KernelError::InvalidState);
        }
        let table = self.tables.video[pid].address();
        self.tables.directories[pid].0[VIDMAP_DIR_INDEX] = table | USER | WRITABLE | PRESENT;
        self.tables.video[pid].0[VIDEO_PAGE_INDEX] = VIDEO_PHYS as u32 | USER | WRITABLE | PRESENT;
        self.state[pid] = PagingState::VideoMapped;
        cpu.load_page_directory(self.directory_address(pid));
        *out = VIDMAP_VIRT;
        Ok(())
    }

    /// Redirects `pid`'s user video page to `physical`, either real video
    /// memory or a terminal back-buffer. Does nothing before `map_video`.
    pub fn remap_video(&mut self, pid: Pid, physical: usize, cpu: &impl Cpu) -> KResult<()> {
        if pid >= MAX_PID {
            return Err(KernelError::OutOfRange);
        }
        if self.state[pid] != PagingState::VideoMapped {
            return Ok(());
        }
        self.tables.video[pid].0[VIDEO_PAGE_INDEX] =
            (physical as u32 & ADDRESS_MASK) | USER | WRITABLE | PRESENT;
        cpu.load_page_directory(self.directory_address(pid));
        Ok(())
    }

    pub fn state(&self, pid: Pid) -> PagingState {
        self.state[pid]
    }

    pub fn directory(&self, pid: Pid) -> &PageTable {
        &self.tables.directories[pid]
    }

    pub fn video_table(&self, pid: Pid) -> &PageTable {
        &self.tables.video[pid]
    }

    pub fn directory_address(&self, pid: Pid) -> usize {
        &self.tables.directories[pid] as *const PageTable as usize
    }

    fn fill_directory(&mut self, pid: Pid) {
        let low = self.tables.low.address();
        let dir = &mut self.tables.directories[pid].0;
        for (i, entry) in dir.iter_mut().enumerate() {
            *entry = ((i * LARGE_PAGE_SIZE) as u32) | WRITABLE;
        }
        // supervisor only and write-protected
        dir[0] = low | PRESENT;
        dir[KERNEL_DIR_INDEX] = KERNEL_PAGE_BASE as u32 | GLOBAL | LARGE | WRITABLE | PRESENT;
    }
}

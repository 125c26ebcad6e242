// testing.rs
//! Fixtures for the hosted test build: a recording CPU, leaked kernel
//! memory and a small boot filesystem.

use std::boxed::Box;
use std::cell::UnsafeCell;
use std::sync::Mutex;
use std::vec;
use std::vec::Vec;

use crate::config::{KernelConfig, FILENAME_MAX, KERNEL_STACK_SIZE, MAX_PID, PROGRAM_IMAGE_MAX, PROGRAM_LOAD_ADDR};
use crate::context::{Cpu, SavedContext};
use crate::fs::{FileSystem, FileType, BLOCK_SIZE, DENTRY_SIZE, ENTRY_POINT_OFFSET, EXEC_MAGIC};
use crate::paging::PageTables;
use crate::pcb::KernelStacks;
use crate::rtc::Rtc;
use crate::system::{Kernel, System};
use crate::vga::Console;

pub const SHELL_ENTRY: usize = 0x0804_8100;
const PROGRAM_ENTRY: usize = 0x0804_8200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuEvent {
    LoadDirectory(usize),
    KernelStack(usize),
    Switch { save: usize, load: usize },
    EnterUser { entry: usize, stack: usize },
    Resume { load: usize, status: i32 },
}

/// A [`Cpu`] that logs what it was asked to do. User memory is a heap
/// buffer standing in for the program window.
pub struct RecordingCpu {
    events: Mutex<Vec<CpuEvent>>,
    window: UnsafeCell<Box<[u8]>>,
}

unsafe impl Sync for RecordingCpu {}

impl RecordingCpu {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            window: UnsafeCell::new(vec![0u8; PROGRAM_IMAGE_MAX].into_boxed_slice()),
        }
    }

    pub fn events(&self) -> Vec<CpuEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn record(&self, event: CpuEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Cpu for RecordingCpu {
    fn load_page_directory(&self, directory: usize) {
        self.record(CpuEvent::LoadDirectory(directory));
    }

    fn set_kernel_stack(&self, esp0: usize) {
        self.record(CpuEvent::KernelStack(esp0));
    }

    unsafe fn user_memory(&self, addr: usize, len: usize) -> *mut u8 {
        let offset = addr - PROGRAM_LOAD_ADDR;
        assert!(offset + len <= PROGRAM_IMAGE_MAX);
        (*self.window.get()).as_mut_ptr().add(offset)
    }

    unsafe fn context_switch(&self, save: *mut SavedContext, load: *const SavedContext) {
        self.record(CpuEvent::Switch { save: save as usize, load: load as usize });
    }

    unsafe fn enter_user(&self, _save: *mut SavedContext, entry: usize, user_stack: usize) -> i32 {
        self.record(CpuEvent::EnterUser { entry, stack: user_stack });
        0
    }

    unsafe fn resume(&self, load: *const SavedContext, status: i32) {
        self.record(CpuEvent::Resume { load: load as usize, status });
    }
}

/// Heap memory for `MAX_PID` kernel stack slots, with an aligned top.
pub struct StackRegion {
    memory: Vec<u8>,
}

impl StackRegion {
    pub fn new() -> Self {
        Self { memory: vec![0u8; (MAX_PID + 1) * KERNEL_STACK_SIZE] }
    }

    pub fn top(&self) -> usize {
        let end = self.memory.as_ptr() as usize + self.memory.len();
        end & !(KERNEL_STACK_SIZE - 1)
    }
}

pub fn page_tables() -> &'static mut PageTables {
    Box::leak(Box::new(PageTables::new()))
}

pub fn console() -> &'static Console {
    Box::leak(Box::new(Console::new(0)))
}

pub fn rtc() -> &'static Rtc {
    Box::leak(Box::new(Rtc::new()))
}

/// Builds a boot filesystem image. The directory entry `.` is always first.
pub struct FsImage {
    files: Vec<(Vec<u8>, FileType, Vec<u8>)>,
}

impl FsImage {
    pub fn new() -> Self {
        Self { files: vec![(b".".to_vec(), FileType::Directory, Vec::new())] }
    }

    pub fn file(mut self, name: &[u8], kind: FileType, data: &[u8]) -> Self {
        assert!(name.len() <= FILENAME_MAX);
        self.files.push((name.to_vec(), kind, data.to_vec()));
        self
    }

    pub fn build(self) -> &'static [u8] {
        let regular: Vec<&Vec<u8>> = self
            .files
            .iter()
            .filter(|(_, kind, _)| *kind == FileType::Regular)
            .map(|(_, _, data)| data)
            .collect();
        let blocks_of = |data: &Vec<u8>| data.len().div_ceil(BLOCK_SIZE);
        let inode_count = regular.len();
        let data_blocks: usize = regular.iter().map(|d| blocks_of(d)).sum();

        let mut image = vec![0u8; (1 + inode_count + data_blocks) * BLOCK_SIZE];
        put_u32(&mut image, 0, self.files.len() as u32);
        put_u32(&mut image, 4, inode_count as u32);
        put_u32(&mut image, 8, data_blocks as u32);

        let mut inode = 0;
        let mut next_block = 0;
        let data_base = (1 + inode_count) * BLOCK_SIZE;
        for (i, (name, kind, data)) in self.files.iter().enumerate() {
            let entry = DENTRY_SIZE + i * DENTRY_SIZE;
            image[entry..entry + name.len()].copy_from_slice(name);
            let raw_kind = match kind {
                FileType::Rtc => 0,
                FileType::Directory => 1,
                FileType::Regular => 2,
            };
            put_u32(&mut image, entry + 32, raw_kind);
            if *kind != FileType::Regular {
                continue;
            }
            put_u32(&mut image, entry + 36, inode as u32);
            let inode_base = (1 + inode) * BLOCK_SIZE;
            put_u32(&mut image, inode_base, data.len() as u32);
            for (slot, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                put_u32(&mut image, inode_base + 4 + slot * 4, next_block as u32);
                let start = data_base + next_block * BLOCK_SIZE;
                image[start..start + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
            inode += 1;
        }
        Box::leak(image.into_boxed_slice())
    }
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// A minimal executable: magic, entry point and some padding.
pub fn program(entry: usize) -> Vec<u8> {
    let mut image = vec![0u8; 256];
    image[..4].copy_from_slice(&EXEC_MAGIC);
    image[ENTRY_POINT_OFFSET..ENTRY_POINT_OFFSET + 4].copy_from_slice(&(entry as u32).to_le_bytes());
    image
}

pub fn filesystem() -> FileSystem<'static> {
    let mut stub = EXEC_MAGIC.to_vec();
    stub.extend_from_slice(&[0; 8]);
    let image = FsImage::new()
        .file(b"rtc", FileType::Rtc, &[])
        .file(b"shell", FileType::Regular, &program(SHELL_ENTRY))
        .file(b"ls", FileType::Regular, &program(PROGRAM_ENTRY))
        .file(b"cat", FileType::Regular, &program(PROGRAM_ENTRY))
        .file(b"frame0.txt", FileType::Regular, b"/\\/\\ fish\n<>< ~~~\n")
        .file(b"stub", FileType::Regular, &stub)
        .build();
    FileSystem::new(image).unwrap()
}

/// A kernel with paging on and no process launched yet.
pub fn system() -> System<RecordingCpu> {
    let region = Box::leak(Box::new(StackRegion::new()));
    let stacks = unsafe { KernelStacks::new(region.top()) };
    let cpu = RecordingCpu::new();
    let mut kernel = Kernel::new(page_tables(), stacks);
    kernel.init_paging(&cpu);
    System::new(cpu, kernel, filesystem(), console(), rtc(), KernelConfig::default())
}

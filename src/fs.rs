// fs.rs
//! Read-only flat filesystem handed to the kernel as a boot module.
//!
//! Every block is 4KB. Block 0 is the boot block: three little-endian
//! counts, 52 reserved bytes and up to 63 directory entries of 64 bytes.
//! Inodes follow, one block each: a length and 1023 data-block indices.
//! Data blocks come after the last inode.

use log::debug;

use crate::config::FILENAME_MAX;
use crate::device::{FileCursor, FileOperations};
use crate::error::{KResult, KernelError};

pub const BLOCK_SIZE: usize = 4096;
pub const DENTRY_SIZE: usize = 64;
pub const MAX_DENTRIES: usize = 63;
const DENTRY_TABLE_OFFSET: usize = 64;
const INODE_MAX_BLOCKS: usize = BLOCK_SIZE / 4 - 1;

pub const EXEC_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub const ENTRY_POINT_OFFSET: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Rtc,
    Directory,
    Regular,
}

impl FileType {
    fn from_raw(raw: u32) -> KResult<Self> {
        match raw {
            0 => Ok(FileType::Rtc),
            1 => Ok(FileType::Directory),
            2 => Ok(FileType::Regular),
            _ => Err(KernelError::OutOfRange),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dentry {
    name: [u8; FILENAME_MAX],
    pub kind: FileType,
    pub inode: u32,
}

impl Dentry {
    /// Name without NUL padding; a full 32-byte name has no terminator.
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(FILENAME_MAX);
        &self.name[..len]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileSystem<'a> {
    image: &'a [u8],
    dir_count: usize,
    inode_count: usize,
    data_block_count: usize,
    data_base: usize,
}

fn read_u32(bytes: &[u8], offset: usize) -> KResult<u32> {
    let raw = bytes.get(offset..offset + 4).ok_or(KernelError::OutOfRange)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

impl<'a> FileSystem<'a> {
    pub fn new(image: &'a [u8]) -> KResult<Self> {
        if image.len() < BLOCK_SIZE {
            return Err(KernelError::OutOfRange);
        }
        let dir_count = read_u32(image, 0)? as usize;
        let inode_count = read_u32(image, 4)? as usize;
        let data_block_count = read_u32(image, 8)? as usize;
        if dir_count > MAX_DENTRIES {
            return Err(KernelError::OutOfRange);
        }
        let data_base = inode_count
            .checked_add(1)
            .and_then(|blocks| blocks.checked_mul(BLOCK_SIZE))
            .ok_or(KernelError::OutOfRange)?;
        let end = data_block_count
            .checked_mul(BLOCK_SIZE)
            .and_then(|len| len.checked_add(data_base))
            .ok_or(KernelError::OutOfRange)?;
        if image.len() < end {
            return Err(KernelError::OutOfRange);
        }
        debug!(
            "fs: {} entries, {} inodes, {} data blocks",
            dir_count, inode_count, data_block_count
        );
        Ok(Self { image, dir_count, inode_count, data_block_count, data_base })
    }

    pub fn entry_count(&self) -> usize {
        self.dir_count
    }

    pub fn lookup_by_index(&self, index: usize) -> KResult<Dentry> {
        if index >= self.dir_count {
            return Err(KernelError::NotFound);
        }
        let base = DENTRY_TABLE_OFFSET + index * DENTRY_SIZE;
        let mut name = [0u8; FILENAME_MAX];
        name.copy_from_slice(&self.image[base..base + FILENAME_MAX]);
        Ok(Dentry {
            name,
            kind: FileType::from_raw(read_u32(self.image, base + 32)?)?,
            inode: read_u32(self.image, base + 36)?,
        })
    }

    pub fn lookup_by_name(&self, name: &[u8]) -> KResult<Dentry> {
        if name.is_empty() || name.len() > FILENAME_MAX {
            return Err(KernelError::NotFound);
        }
        (0..self.dir_count)
            .filter_map(|i| self.lookup_by_index(i).ok())
            .find(|dentry| dentry.name() == name)
            .ok_or(KernelError::NotFound)
    }

    pub fn file_length(&self, inode: u32) -> KResult<usize> {
        Ok(read_u32(self.image, self.inode_offset(inode)?)? as usize)
    }

    /// Copies up to `buf.len()` bytes starting at `offset`, returning the
    /// number copied. Reading at or past the end yields 0.
    pub fn read_data(&self, inode: u32, offset: usize, buf: &mut [u8]) -> KResult<usize> {
        let inode_base = self.inode_offset(inode)?;
        let length = read_u32(self.image, inode_base)? as usize;
        if offset >= length {
            return Ok(0);
        }
        let count = buf.len().min(length - offset);

        let mut copied = 0;
        while copied < count {
            let pos = offset + copied;
            let slot = pos / BLOCK_SIZE;
            if slot >= INODE_MAX_BLOCKS {
                return Err(KernelError::OutOfRange);
            }
            let block = read_u32(self.image, inode_base + 4 + slot * 4)? as usize;
            if block >= self.data_block_count {
                return Err(KernelError::OutOfRange);
            }
            let within = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(count - copied);
            let start = self.data_base + block * BLOCK_SIZE + within;
            let src = self
                .image
                .get(start..start + chunk)
                .ok_or(KernelError::OutOfRange)?;
            buf[copied..copied + chunk].copy_from_slice(src);
            copied += chunk;
        }
        Ok(copied)
    }

    pub fn is_executable(&self, dentry: &Dentry) -> bool {
        if dentry.kind != FileType::Regular {
            return false;
        }
        let mut magic = [0u8; 4];
        matches!(self.read_data(dentry.inode, 0, &mut magic), Ok(4)) && magic == EXEC_MAGIC
    }

    /// Copies the whole image into `window` (which starts at the program
    /// load address), zeroes the rest of the window and returns the entry
    /// point stored at byte 24.
    pub fn load(&self, dentry: &Dentry, window: &mut [u8]) -> KResult<usize> {
        let length = self.file_length(dentry.inode)?;
        if length < ENTRY_POINT_OFFSET + 4 {
            return Err(KernelError::NotExecutable);
        }
        if length > window.len() {
            return Err(KernelError::OutOfRange);
        }
        let copied = self.read_data(dentry.inode, 0, &mut window[..length])?;
        if copied != length {
            return Err(KernelError::OutOfRange);
        }
        window[length..].fill(0);
        Ok(read_u32(window, ENTRY_POINT_OFFSET)? as usize)
    }

    fn inode_offset(&self, inode: u32) -> KResult<usize> {
        let inode = inode as usize;
        if inode >= self.inode_count {
            return Err(KernelError::OutOfRange);
        }
        inode
            .checked_add(1)
            .and_then(|block| block.checked_mul(BLOCK_SIZE))
            .ok_or(KernelError::OutOfRange)
    }
}

/// Operations on a descriptor opened on a regular file.
pub struct RegularFile<'a>(pub &'a FileSystem<'a>);

impl FileOperations for RegularFile<'_> {
    fn open(&self, _name: &[u8]) -> KResult<()> {
        Ok(())
    }

    fn read(&self, file: &mut FileCursor, buf: &mut [u8]) -> KResult<usize> {
        let n = self.0.read_data(file.inode, file.position as usize, buf)?;
        file.position += n as u32;
        Ok(n)
    }

    fn write(&self, _file: &mut FileCursor, _buf: &[u8]) -> KResult<usize> {
        Err(KernelError::Unsupported)
    }

    fn close(&self, _file: &mut FileCursor) -> KResult<()> {
        Ok(())
    }
}

/// Operations on the directory: each read yields the next file name.
pub struct Directory<'a>(pub &'a FileSystem<'a>);

impl FileOperations for Directory<'_> {
    fn open(&self, _name: &[u8]) -> KResult<()> {
        Ok(())
    }

    fn read(&self, file: &mut FileCursor, buf: &mut [u8]) -> KResult<usize> {
        let index = file.position as usize;
        if index >= self.0.entry_count() {
            return Ok(0);
        }
        let dentry = self.0.lookup_by_index(index)?;
        let name = dentry.name();
        let n = name.len().min(buf.len());
        buf[..n].copy_from_slice(&name[..n]);
        file.position += 1;
        Ok(n)
    }

    fn write(&self, _file: &mut FileCursor, _buf: &[u8]) -> KResult<usize> {
        Err(KernelError::Unsupported)
    }

    fn close(&self, _file: &mut FileCursor) -> KResult<()> {
        Ok(())
    }
}

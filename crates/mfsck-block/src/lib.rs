#![forbid(unsafe_code)]
//! Positioned byte I/O over a filesystem image.
//!
//! Provides the [`ByteDevice`] trait with pread/pwrite semantics, a
//! file-backed implementation for block devices and regular files, and a
//! memory-backed implementation for tests. All checker I/O is synchronous
//! and blocking; the process owns the image exclusively for its run.

use mfsck_types::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum BlockIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access out of bounds: offset={offset} len={len} device_len={device_len}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        device_len: u64,
    },

    #[error("device opened read-only")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, BlockIoError>;

/// Byte-addressed device for fixed-offset I/O.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Byte offset of block `nr`.
#[must_use]
pub fn block_offset(nr: u32) -> u64 {
    u64::from(nr) * BLOCK_SIZE as u64
}

/// File-backed device using `pread`/`pwrite` style I/O.
///
/// Uses `std::os::unix::fs::FileExt`, which needs no shared seek position.
#[derive(Debug)]
pub struct FileByteDevice {
    file: File,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    /// Open `path` read-write when `writable`, read-only otherwise. Unlike a
    /// best-effort open, a repair run must fail loudly if the image cannot
    /// be written.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            writable,
        })
    }

    fn check_bounds(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len as u64)
            .ok_or(BlockIoError::OutOfBounds {
                offset,
                len,
                device_len: self.len,
            })?;
        if end > self.len {
            return Err(BlockIoError::OutOfBounds {
                offset,
                len,
                device_len: self.len,
            });
        }
        Ok(())
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_bounds(offset, buf.len())?;
        trace!(target: "mfsck::block", event = "read", offset, len = buf.len());
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(BlockIoError::ReadOnly);
        }
        self.check_bounds(offset, buf.len())?;
        trace!(target: "mfsck::block", event = "write", offset, len = buf.len());
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Memory-backed device for tests and fixtures.
#[derive(Debug)]
pub struct MemByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    /// Snapshot of the current image contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = usize::try_from(offset).map_err(|_| BlockIoError::OutOfBounds {
            offset,
            len: buf.len(),
            device_len: bytes.len() as u64,
        })?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= bytes.len())
            .ok_or(BlockIoError::OutOfBounds {
                offset,
                len: buf.len(),
                device_len: bytes.len() as u64,
            })?;
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let len = bytes.len();
        let start = usize::try_from(offset).map_err(|_| BlockIoError::OutOfBounds {
            offset,
            len: buf.len(),
            device_len: len as u64,
        })?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= len)
            .ok_or(BlockIoError::OutOfBounds {
                offset,
                len: buf.len(),
                device_len: len as u64,
            })?;
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

//! Memory - Process memory operations
//!
//! Reads and writes the debuggee through `/proc/<pid>/mem` and enumerates
//! its mappings from `/proc/<pid>/maps`. A tracer's writes through `mem`
//! succeed on read-only and RX pages, which is what breakpoint insertion and
//! page marking both rely on.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use thiserror::Error;

use crate::debug::ProcessMemory;

/// Memory operation errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to read memory at {address:#x}: {reason}")]
    ReadFailed { address: u64, reason: String },

    #[error("Failed to write memory at {address:#x}: {reason}")]
    WriteFailed { address: u64, reason: String },

    #[error("Invalid memory region: {address:#x} (+{size})")]
    InvalidRegion { address: u64, size: usize },

    #[error("Failed to read memory map of process {pid}: {reason}")]
    MapsUnavailable { pid: u32, reason: String },

    #[error("No process attached")]
    NoProcess,
}

/// Memory protection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProtection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl MemoryProtection {
    pub const RX: Self = Self {
        read: true,
        write: false,
        execute: true,
    };
    pub const RW: Self = Self {
        read: true,
        write: true,
        execute: false,
    };
    pub const NONE: Self = Self {
        read: false,
        write: false,
        execute: false,
    };

    /// Parse the `rwxp` column of a maps line
    pub fn from_perms(perms: &str) -> Self {
        let bytes = perms.as_bytes();
        Self {
            read: bytes.first() == Some(&b'r'),
            write: bytes.get(1) == Some(&b'w'),
            execute: bytes.get(2) == Some(&b'x'),
        }
    }
}

/// Represents a memory region in the target process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Start address of the region
    pub base_address: u64,

    /// Size of the region in bytes
    pub size: u64,

    /// Memory protection flags
    pub protection: MemoryProtection,

    /// Offset into the backing file
    pub file_offset: u64,

    /// Optional name (e.g., module path, "[stack]", "[heap]")
    pub name: Option<String>,
}

impl MemoryRegion {
    /// Parse one line of `/proc/<pid>/maps`.
    ///
    /// `7f12a000-7f12b000 r-xp 00001000 08:01 1234   /usr/lib/libc.so.6`
    pub fn parse_maps_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let perms = fields.next()?;
        let offset = fields.next()?;
        let _dev = fields.next()?;
        let _inode = fields.next()?;
        let name = fields.collect::<Vec<_>>().join(" ");

        let (start, end) = range.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        if end < start {
            return None;
        }

        Some(Self {
            base_address: start,
            size: end - start,
            protection: MemoryProtection::from_perms(perms),
            file_offset: u64::from_str_radix(offset, 16).ok()?,
            name: if name.is_empty() { None } else { Some(name) },
        })
    }

    /// Path of the backing file, if this is a live file mapping
    pub fn file_path(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|name| name.starts_with('/') && !name.ends_with("(deleted)"))
    }

    pub fn end_address(&self) -> u64 {
        self.base_address + self.size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_address && address < self.end_address()
    }
}

/// Memory manager for reading/writing process memory
#[derive(Debug, Default)]
pub struct MemoryManager {
    /// Target PID
    target_pid: Option<u32>,
}

impl MemoryManager {
    /// Create a new memory manager
    pub fn new() -> Self {
        Self { target_pid: None }
    }

    /// Memory manager bound to `pid`
    pub fn for_process(pid: u32) -> Self {
        Self {
            target_pid: Some(pid),
        }
    }

    pub fn target_pid(&self) -> Option<u32> {
        self.target_pid
    }

    /// Read memory from the target process
    pub fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buffer = vec![0u8; size];
        let bytes_read = self.read_into(address, &mut buffer)?;
        if bytes_read != size {
            return Err(MemoryError::InvalidRegion { address, size });
        }
        Ok(buffer)
    }

    /// Read memory into an existing buffer
    pub fn read_into(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        let mut file = File::open(self.mem_path()?).map_err(|e| MemoryError::ReadFailed {
            address,
            reason: e.to_string(),
        })?;

        file.seek(SeekFrom::Start(address))
            .map_err(|e| MemoryError::ReadFailed {
                address,
                reason: e.to_string(),
            })?;

        let bytes_read = file.read(buffer).map_err(|e| MemoryError::ReadFailed {
            address,
            reason: e.to_string(),
        })?;

        Ok(bytes_read)
    }

    /// Write memory to the target process.
    ///
    /// Returns the byte count the kernel accepted, which may be short when
    /// the range crosses into an unmapped page.
    pub fn write(&self, address: u64, data: &[u8]) -> Result<usize, MemoryError> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.mem_path()?)
            .map_err(|e| MemoryError::WriteFailed {
                address,
                reason: e.to_string(),
            })?;

        file.seek(SeekFrom::Start(address))
            .map_err(|e| MemoryError::WriteFailed {
                address,
                reason: e.to_string(),
            })?;

        let bytes_written = file.write(data).map_err(|e| MemoryError::WriteFailed {
            address,
            reason: e.to_string(),
        })?;

        Ok(bytes_written)
    }

    /// Get memory regions of the target process
    pub fn query_regions(&self) -> Result<Vec<MemoryRegion>, MemoryError> {
        let pid = self.target_pid.ok_or(MemoryError::NoProcess)?;
        let maps = fs::read_to_string(format!("/proc/{}/maps", pid)).map_err(|e| {
            MemoryError::MapsUnavailable {
                pid,
                reason: e.to_string(),
            }
        })?;

        Ok(maps.lines().filter_map(MemoryRegion::parse_maps_line).collect())
    }

    fn mem_path(&self) -> Result<String, MemoryError> {
        let pid = self.target_pid.ok_or(MemoryError::NoProcess)?;
        Ok(format!("/proc/{}/mem", pid))
    }
}

impl ProcessMemory for MemoryManager {
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        self.read(address, size)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize, MemoryError> {
        self.write(address, data)
    }
}

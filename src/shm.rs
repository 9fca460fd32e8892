//! POSIX system shared-memory regions for zero-copy tensor transfer.
//!
//! A [`SystemSharedMemory`] owns one `shm_open`ed object and its writable
//! mapping. Dropping the handle unmaps the region and unlinks the object;
//! the server-side registration is managed separately by the client.

use std::os::fd::AsRawFd;

use memmap2::{MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::error::{Error, Result};

/// One POSIX shared-memory region, created and mapped read-write.
pub struct SystemSharedMemory {
    key: String,
    map: MmapMut,
}

impl SystemSharedMemory {
    /// Create and map a new region. The key must be unused and start with
    /// `/`, e.g. `/inferlink_input0_7`.
    pub fn create(key: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::SharedMemory(format!(
                "region {key}: zero-length regions cannot be mapped"
            )));
        }
        let fd = shm_open(
            key,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| Error::SharedMemory(format!("shm_open {key}: {e}")))?;

        if let Err(e) = ftruncate(&fd, len as nix::libc::off_t) {
            let _ = shm_unlink(key);
            return Err(Error::SharedMemory(format!("ftruncate {key}: {e}")));
        }

        let map = unsafe { MmapOptions::new().len(len).map_mut(fd.as_raw_fd()) };
        let map = match map {
            Ok(map) => map,
            Err(e) => {
                let _ = shm_unlink(key);
                return Err(Error::SharedMemory(format!("mmap {key}: {e}")));
            }
        };

        Ok(Self {
            key: key.to_string(),
            map,
        })
    }

    /// The POSIX object key, as passed to the server at registration.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copy `bytes` into the region at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| Error::SharedMemory(format!("region {}: offset overflow", self.key)))?;
        if end > self.map.len() {
            return Err(Error::SharedMemory(format!(
                "region {}: write of {} bytes at offset {offset} exceeds {} byte region",
                self.key,
                bytes.len(),
                self.map.len()
            )));
        }
        self.map[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes out of the region starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::SharedMemory(format!("region {}: offset overflow", self.key)))?;
        if end > self.map.len() {
            return Err(Error::SharedMemory(format!(
                "region {}: read of {len} bytes at offset {offset} exceeds {} byte region",
                self.key,
                self.map.len()
            )));
        }
        Ok(self.map[offset..end].to_vec())
    }
}

impl Drop for SystemSharedMemory {
    fn drop(&mut self) {
        // The mapping is released by MmapMut; the object itself needs an
        // explicit unlink or it outlives the process.
        let _ = shm_unlink(self.key.as_str());
    }
}

impl std::fmt::Debug for SystemSharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSharedMemory")
            .field("key", &self.key)
            .field("len", &self.map.len())
            .finish()
    }
}

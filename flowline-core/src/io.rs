//! File access helpers shared by the record readers

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, Result};

/// Read-only memory-mapped file
pub struct MemoryMappedFile {
    mmap: Option<Mmap>,
    path: PathBuf,
    size: usize,
}

impl MemoryMappedFile {
    /// Map a file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = usize::try_from(file.metadata()?.len())
            .map_err(|_| Error::InvalidArgument(format!("{} is too large to map", path.display())))?;

        // Zero-length mappings are rejected by the OS.
        let mmap = if size == 0 {
            None
        } else {
            // SAFETY: the file is opened read-only and the mapping never
            // outlives this struct. Truncation by another process while
            // mapped is not guarded against.
            #[allow(unsafe_code)]
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            Some(mmap)
        };

        Ok(Self { mmap, path, size })
    }

    /// Whole mapped file
    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// `length` bytes starting at `offset`
    pub fn slice(&self, offset: usize, length: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "range {offset}+{length} outside {} ({} bytes)",
                    self.path.display(),
                    self.size
                ))
            })?;
        Ok(&self.as_slice()[offset..end])
    }

    /// Path of the mapped file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Debug for MemoryMappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMappedFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

//! Shared memory buffer resolver
//!
//! Opens the process-visible segment a client names in its preamble and
//! hands out zero-copy views into it.
//!
//! - **BufferResolver**: maps handle names to segments under a root
//!   directory (`/dev/shm` on Linux) and opens them read-only
//! - **SharedRegion**: owned mapping; views borrow from it, so the borrow
//!   checker keeps every view inside the region's lifetime
//!
//! The region is never written by this crate. Closing is idempotent and
//! also happens on drop, so cancellation releases the mapping too.

use crate::{Error, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Opens named shared memory segments
#[derive(Debug, Clone)]
pub struct BufferResolver {
    root: PathBuf,
}

impl BufferResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `handle_name` read-only for exactly `length_bytes`
    pub fn open(&self, handle_name: &str, length_bytes: u64) -> Result<SharedRegion> {
        let segment = segment_name(handle_name)?;
        let path = self.root.join(segment);

        if length_bytes == 0 {
            return Err(Error::RegionTooSmall {
                handle: handle_name.to_string(),
                declared: 0,
                actual: 0,
            });
        }
        let len = usize::try_from(length_bytes).map_err(|_| Error::RegionTooSmall {
            handle: handle_name.to_string(),
            declared: length_bytes,
            actual: usize::MAX as u64,
        })?;

        let unavailable = |source| Error::RegionUnavailable {
            handle: handle_name.to_string(),
            source,
        };

        let file = File::open(&path).map_err(unavailable)?;
        let actual = file.metadata().map_err(unavailable)?.len();
        if actual < length_bytes {
            return Err(Error::RegionTooSmall {
                handle: handle_name.to_string(),
                declared: length_bytes,
                actual,
            });
        }

        // SAFETY: the mapping is read-only and private to this region; views
        // borrow from `SharedRegion` and cannot outlive the unmap.
        let mmap = unsafe { MmapOptions::new().len(len).map(&file) }.map_err(unavailable)?;

        info!(
            handle = %handle_name,
            path = %path.display(),
            length_bytes,
            "Opened shared memory region"
        );

        Ok(SharedRegion {
            handle: handle_name.to_string(),
            mmap: Some(mmap),
        })
    }
}

/// Strip the conventional leading '/' and reject anything that is not a
/// single path component
fn segment_name(handle_name: &str) -> Result<&str> {
    let name = handle_name.strip_prefix('/').unwrap_or(handle_name);
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(Error::InvalidHandleName(handle_name.to_string()));
    }
    Ok(name)
}

/// A read-only mapped shared memory segment
#[derive(Debug)]
pub struct SharedRegion {
    handle: String,
    mmap: Option<Mmap>,
}

impl SharedRegion {
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Mapped length in bytes; 0 once closed
    pub fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self) -> bool {
        self.mmap.is_some()
    }

    /// Zero-copy view over `[offset, offset + length)`
    pub fn resolve(&self, offset: u64, length: u64) -> Result<&[u8]> {
        let out_of_bounds = || Error::OutOfBounds {
            handle: self.handle.clone(),
            offset,
            length,
            region_len: self.len(),
        };

        let mmap = self.mmap.as_ref().ok_or_else(out_of_bounds)?;
        let end = offset.checked_add(length).ok_or_else(out_of_bounds)?;
        if end > mmap.len() as u64 {
            return Err(out_of_bounds());
        }

        Ok(&mmap[offset as usize..end as usize])
    }

    /// Release the mapping; returns `false` if it was already released
    pub fn close(&mut self) -> bool {
        if self.mmap.take().is_some() {
            info!(handle = %self.handle, "Released shared memory region");
            true
        } else {
            debug!(handle = %self.handle, "Shared memory region already released");
            false
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

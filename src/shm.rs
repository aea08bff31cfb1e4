// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Memory segments the ring is laid out in.
// `ShmSegment` delegates to platform::PlatformShm (POSIX or Windows);
// `HeapSegment` keeps everything inside the current process.

use std::alloc::{self, Layout};
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::platform::PlatformShm;

/// A contiguous, zero-initialised byte range shared by producer and consumer.
///
/// The range stays mapped at a fixed address for the lifetime of the value.
pub trait Segment: Send + Sync {
    /// Start of the usable range.
    fn as_mut_ptr(&self) -> *mut u8;

    /// Usable size in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named, inter-process shared memory region.
///
/// The mapping carries a reference counter shared by every handle
/// mapping the same object; the last handle to drop removes the object.
pub struct ShmSegment {
    inner: PlatformShm,
}

impl ShmSegment {
    /// Create a fresh region of `size` usable bytes; fails if one with this
    /// name exists.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        let inner = PlatformShm::create(name, size)?;
        Ok(Self { inner })
    }

    /// Attach to an existing region. The size is taken from the object.
    pub fn attach(name: &str) -> io::Result<Self> {
        let inner = PlatformShm::attach(name)?;
        Ok(Self { inner })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    pub fn user_size(&self) -> usize {
        self.inner.user_size()
    }

    /// Number of handles currently mapping this segment, across processes.
    pub fn ref_count(&self) -> i32 {
        self.inner.ref_count()
    }

    /// True when this handle was the first to map the object.
    pub fn is_first(&self) -> bool {
        self.inner.prev_ref_count() == 0
    }

    /// Remove the backing storage for a named segment left behind by a
    /// process that did not shut down cleanly.
    pub fn clear_storage(name: &str) {
        PlatformShm::unlink_by_name(name);
    }
}

impl Segment for ShmSegment {
    fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.inner.user_size()
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("user_size", &self.user_size())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HeapSegment: in-process segment
// ---------------------------------------------------------------------------

const HEAP_ALIGN: usize = 64;

struct HeapBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: the block is plain memory; concurrent access is coordinated by the
// ring through atomics and disjoint spans, exactly as for a shared mapping.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// A zeroed heap allocation standing in for shared memory.
///
/// Clones share the same bytes, so one clone can back the consumer ring and
/// another the producer ring inside a single process.
#[derive(Clone)]
pub struct HeapSegment {
    block: Arc<HeapBlock>,
}

impl HeapSegment {
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let layout = Layout::from_size_align(size, HEAP_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "heap segment"))?;
        Ok(Self {
            block: Arc::new(HeapBlock { ptr, layout }),
        })
    }
}

impl Segment for HeapSegment {
    fn as_mut_ptr(&self) -> *mut u8 {
        self.block.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.block.layout.size()
    }
}

impl std::fmt::Debug for HeapSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapSegment").field("len", &self.len()).finish()
    }
}

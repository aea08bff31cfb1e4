// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One slice of the ring: control block followed by the record area.

use std::ptr::{self, NonNull};

use crate::header::BufferHeader;

/// A buffer of the ring.
///
/// `high_water_mark` is the last offset at which a record of the ring's
/// largest size still fits: `high_water_mark + largest_record == capacity`.
pub struct Buffer {
    index: usize,
    next: usize,
    header: BufferHeader,
    data: NonNull<u8>,
    capacity: usize,
    high_water_mark: usize,
}

// Safety: `data` points into the ring's segment, which outlives the buffer.
// Writers only touch spans they claimed; the consumer only reads dirty
// buffers.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub(crate) fn new(
        index: usize,
        next: usize,
        header: BufferHeader,
        data: NonNull<u8>,
        capacity: usize,
        largest_record: usize,
    ) -> Self {
        debug_assert!(capacity >= largest_record);
        Self {
            index,
            next,
            header,
            data,
            capacity,
            high_water_mark: capacity - largest_record,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the buffer that follows this one in the ring.
    pub fn next(&self) -> usize {
        self.next
    }

    pub fn header(&self) -> &BufferHeader {
        &self.header
    }

    /// Bytes available for records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    #[inline]
    pub fn is_clean(&self) -> bool {
        self.header.is_clean()
    }

    /// Copy `bytes` into the record area at `offset`.
    ///
    /// # Safety
    /// The caller must own `[offset, offset + bytes.len())` exclusively and the
    /// span must lie within `capacity`.
    #[inline]
    pub(crate) unsafe fn write_at(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.capacity);
        ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.as_ptr().add(offset), bytes.len());
    }

    /// Append the first `len` bytes of the record area to `out`.
    ///
    /// # Safety
    /// No producer may be writing the buffer: it must be dirty and owned by
    /// the caller until it is cleared.
    pub(crate) unsafe fn copy_out(&self, len: usize, out: &mut Vec<u8>) {
        let len = len.min(self.capacity);
        out.extend_from_slice(std::slice::from_raw_parts(self.data.as_ptr(), len));
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("index", &self.index)
            .field("next", &self.next)
            .field("capacity", &self.capacity)
            .field("high_water_mark", &self.high_water_mark)
            .field("header", &self.header)
            .finish()
    }
}

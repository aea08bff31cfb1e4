// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-buffer control block.
//
// The first 64 bytes of every buffer slice hold the shared state word, the
// occupied byte count and the sequence number. Producers move a buffer from
// clean to dirty, the consumer moves it back.
//
//   CLEAN ──mark_dirty──▶ FILLING ──(fields stored)──▶ DIRTY ──clear──▶ CLEAN

use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::error;

use crate::signal::Signal;

pub const HEADER_SIZE: usize = 64;

const CLEAN: u32 = 0;
const DIRTY: u32 = 1;
const FILLING: u32 = 2;

#[repr(C)]
pub(crate) struct HeaderBlock {
    state: AtomicU32,
    _reserved: u32,
    occupied: AtomicU64,
    sequence: AtomicU64,
    _pad: [u8; 40],
}

const _: () = assert!(std::mem::size_of::<HeaderBlock>() == HEADER_SIZE);

/// Handle on one buffer's control block plus the signals raised when the
/// buffer turns dirty.
pub struct BufferHeader {
    block: NonNull<HeaderBlock>,
    signal: Arc<dyn Signal>,
    doorbell: Arc<dyn Signal>,
}

impl BufferHeader {
    /// # Safety
    /// `block` must point to `HEADER_SIZE` bytes, 8-aligned, that stay mapped
    /// for the lifetime of the returned value.
    pub(crate) unsafe fn new(
        block: NonNull<u8>,
        signal: Arc<dyn Signal>,
        doorbell: Arc<dyn Signal>,
    ) -> Self {
        Self {
            block: block.cast(),
            signal,
            doorbell,
        }
    }

    fn block(&self) -> &HeaderBlock {
        unsafe { self.block.as_ref() }
    }

    /// Reset to clean. Creator side, before the ring is published.
    pub(crate) fn init(&self) {
        let b = self.block();
        b.occupied.store(0, Ordering::Relaxed);
        b.sequence.store(0, Ordering::Relaxed);
        b.state.store(CLEAN, Ordering::Release);
    }

    /// True when the buffer holds no data awaiting the consumer.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.block().state.load(Ordering::Acquire) == CLEAN
    }

    /// True once the occupied count and sequence are published.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.block().state.load(Ordering::Acquire) == DIRTY
    }

    pub fn occupied(&self) -> u64 {
        self.block().occupied.load(Ordering::Acquire)
    }

    pub fn sequence(&self) -> u64 {
        self.block().sequence.load(Ordering::Acquire)
    }

    /// Hand the buffer to the consumer.
    ///
    /// Returns false, raises nothing and leaves the published fields alone
    /// when the buffer is not clean.
    pub fn mark_dirty(&self, occupied: u64, sequence: u64) -> bool {
        let b = self.block();
        if let Err(state) =
            b.state
                .compare_exchange(CLEAN, FILLING, Ordering::AcqRel, Ordering::Acquire)
        {
            error!(state, sequence, "mark_dirty on a buffer that is not clean");
            return false;
        }
        b.occupied.store(occupied, Ordering::Relaxed);
        b.sequence.store(sequence, Ordering::Relaxed);
        b.state.store(DIRTY, Ordering::Release);

        if let Err(e) = self.signal.post() {
            error!(sequence, "posting buffer signal failed: {e}");
        }
        if let Err(e) = self.doorbell.post() {
            error!(sequence, "posting doorbell failed: {e}");
        }
        true
    }

    /// Return the buffer to the producers. Consumer only, after copying the
    /// data out. Clearing a clean buffer changes nothing.
    ///
    /// The buffer is clean afterwards even when lowering its signal fails;
    /// that error is returned once the state is stored.
    pub fn clear(&self) -> io::Result<()> {
        let b = self.block();
        b.occupied.store(0, Ordering::Relaxed);
        b.sequence.store(0, Ordering::Relaxed);
        let reset = self.signal.reset();
        b.state.store(CLEAN, Ordering::Release);
        reset
    }

    /// Block until the buffer is dirty or `timeout_ms` passes.
    ///
    /// The buffer signal stays raised until [`clear`](Self::clear), so
    /// repeated waits on a dirty buffer return at once.
    pub fn wait_dirty(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        if self.is_dirty() {
            return Ok(true);
        }
        if !self.signal.wait(timeout_ms)? {
            return Ok(false);
        }
        self.signal.post()?;
        Ok(true)
    }
}

// Safety: the block lives in a mapping that outlives the header and every
// field is atomic.
unsafe impl Send for BufferHeader {}
unsafe impl Sync for BufferHeader {}

impl std::fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHeader")
            .field("state", &self.block().state.load(Ordering::Relaxed))
            .field("occupied", &self.occupied())
            .field("sequence", &self.sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::{HeapSegment, Segment};
    use crate::signal::{LocalSignals, SignalProvider};

    fn header(seg: &HeapSegment, signals: &LocalSignals) -> BufferHeader {
        let ptr = NonNull::new(seg.as_mut_ptr()).unwrap();
        let h = unsafe {
            BufferHeader::new(
                ptr,
                signals.create("sig").unwrap(),
                signals.create("bell").unwrap(),
            )
        };
        h.init();
        h
    }

    #[test]
    fn dirty_then_clear() {
        let seg = HeapSegment::new(HEADER_SIZE).unwrap();
        let signals = LocalSignals::new();
        let h = header(&seg, &signals);

        assert!(h.is_clean());
        assert!(h.mark_dirty(100, 7));
        assert!(!h.is_clean());
        assert!(h.is_dirty());
        assert_eq!(h.occupied(), 100);
        assert_eq!(h.sequence(), 7);

        h.clear().unwrap();
        assert!(h.is_clean());
        assert_eq!(h.occupied(), 0);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn second_mark_dirty_is_refused() {
        let seg = HeapSegment::new(HEADER_SIZE).unwrap();
        let signals = LocalSignals::new();
        let h = header(&seg, &signals);
        let bell = signals.open("bell").unwrap();

        assert!(h.mark_dirty(10, 1));
        assert!(!h.mark_dirty(20, 2));
        assert_eq!(h.occupied(), 10);
        assert_eq!(h.sequence(), 1);

        // One post only.
        assert!(bell.try_wait().unwrap());
        assert!(!bell.try_wait().unwrap());
    }

    #[test]
    fn clear_is_idempotent() {
        let seg = HeapSegment::new(HEADER_SIZE).unwrap();
        let signals = LocalSignals::new();
        let h = header(&seg, &signals);

        h.clear().unwrap();
        h.clear().unwrap();
        assert!(h.is_clean());
        assert!(!h.wait_dirty(Some(0)).unwrap());
    }

    #[test]
    fn wait_dirty_keeps_signal_raised() {
        let seg = HeapSegment::new(HEADER_SIZE).unwrap();
        let signals = LocalSignals::new();
        let h = header(&seg, &signals);

        assert!(h.mark_dirty(1, 1));
        assert!(h.wait_dirty(Some(0)).unwrap());
        assert!(h.wait_dirty(Some(0)).unwrap());
        h.clear().unwrap();
        assert!(!h.wait_dirty(Some(0)).unwrap());
    }
}

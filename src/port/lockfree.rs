// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Lock-free multi-writer placement.
//
// The current buffer index and the first free offset share one 64-bit word,
// so a single compare-and-swap claims a span:
//
//   [ buffer index : 32 | offset : 32 ]
//
// A writer whose claim ends at or before the high-water mark ("early") just
// copies its record. The one claim that crosses the mark ("edge") copies,
// waits for the other writers of that buffer to finish, marks the buffer
// dirty and publishes the next clean buffer. Writers arriving after the
// crossing ("late") spin until the edge publishes.
//
// Offsets at the top of the u32 range are sentinels:
//   CHOKED     no clean buffer was left; the next writer retries the walk
//   RECOVERING a writer is retrying that walk
//   SEALED     `flush` is handing the buffer over

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use tracing::debug;

use super::{check_discipline, record_fits, AttachPort, PlacementPort};
use crate::backoff::Backoff;
use crate::config::{SyncDiscipline, TransportConfig};
use crate::error::Result;
use crate::ring::BufferRing;

const CHOKED: u32 = u32::MAX;
const RECOVERING: u32 = u32::MAX - 1;
const SEALED: u32 = u32::MAX - 2;

pub const DEFAULT_RETRY_BUDGET: u32 = 128;

#[inline]
fn pack(index: u32, offset: u32) -> u64 {
    ((index as u64) << 32) | offset as u64
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

pub struct LockFreePort {
    ring: Arc<BufferRing>,
    cursor: CachePadded<AtomicU64>,
    in_flight: CachePadded<AtomicUsize>,
    retry_budget: u32,
}

impl LockFreePort {
    pub fn new(ring: Arc<BufferRing>) -> Self {
        Self::with_retry_budget(ring, DEFAULT_RETRY_BUDGET)
    }

    pub fn with_retry_budget(ring: Arc<BufferRing>, retry_budget: u32) -> Self {
        let start = if ring.get_first().is_clean() {
            pack(0, 0)
        } else {
            pack(0, CHOKED)
        };
        Self {
            ring,
            cursor: CachePadded::new(AtomicU64::new(start)),
            in_flight: CachePadded::new(AtomicUsize::new(0)),
            retry_budget: retry_budget.max(1),
        }
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// Current (buffer index, offset) pair; the offset may be a sentinel.
    pub fn position(&self) -> (u32, u32) {
        unpack(self.cursor.load(Ordering::Acquire))
    }

    /// Retry the ring walk after a choke. `None` when another writer is
    /// already doing it.
    fn recover(&self, index: u32, word: u64) -> Option<bool> {
        if self
            .cursor
            .compare_exchange(word, pack(index, RECOVERING), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        let buf = self.ring.buffer_at(index as usize);
        match self.ring.next_available(buf) {
            Some(next) => {
                debug!(ring = self.ring.name(), buffer = next.index(), "ring recovered");
                self.cursor.store(pack(next.index() as u32, 0), Ordering::Release);
                Some(true)
            }
            None => {
                self.cursor.store(word, Ordering::Release);
                Some(false)
            }
        }
    }

    /// Hand buffer `index` to the consumer once every writer still copying
    /// into it is done, then move the cursor on. Only the edge (or the
    /// flushing thread) gets here, and nobody else stores to the cursor
    /// until it does.
    fn finish_buffer(&self, index: u32, occupied: u32) {
        let mut backoff = Backoff::new();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }

        let buf = self.ring.buffer_at(index as usize);
        buf.header().mark_dirty(occupied as u64, self.ring.next_sequence());

        let next = match self.ring.next_available(buf) {
            Some(next) => pack(next.index() as u32, 0),
            None => {
                debug!(ring = self.ring.name(), buffer = index, "ring choked");
                pack(index, CHOKED)
            }
        };
        self.cursor.store(next, Ordering::Release);
    }
}

impl PlacementPort for LockFreePort {
    fn put(&self, record: &[u8]) -> bool {
        if !record_fits(&self.ring, record) {
            return false;
        }
        let len = record.len() as u32;
        let mut backoff = Backoff::new();

        for _ in 0..self.retry_budget {
            let word = self.cursor.load(Ordering::Acquire);
            let (index, offset) = unpack(word);

            match offset {
                CHOKED => match self.recover(index, word) {
                    Some(true) => continue,
                    Some(false) => return false,
                    None => {
                        backoff.spin();
                        continue;
                    }
                },
                RECOVERING | SEALED => {
                    backoff.spin();
                    continue;
                }
                _ => {}
            }

            let buf = self.ring.buffer_at(index as usize);
            let mark = buf.high_water_mark() as u32;
            if offset > mark {
                // Late: the edge has not published the next buffer yet.
                backoff.spin();
                continue;
            }

            // Announce before claiming so the edge cannot miss this writer.
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let end = offset + len;
            if self
                .cursor
                .compare_exchange(word, pack(index, end), Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            // offset <= mark and len <= largest record keep the span inside
            // the record area; the claim makes it ours alone.
            unsafe { buf.write_at(offset as usize, record) };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if end > mark {
                self.finish_buffer(index, end);
            }
            return true;
        }
        false
    }

    fn flush(&self) -> bool {
        let mut backoff = Backoff::new();
        for _ in 0..self.retry_budget {
            let word = self.cursor.load(Ordering::Acquire);
            let (index, offset) = unpack(word);
            let buf = self.ring.buffer_at(index as usize);
            if offset == 0 || offset > buf.high_water_mark() as u32 {
                // Empty, already past the mark, or a sentinel.
                return false;
            }
            if self
                .cursor
                .compare_exchange(word, pack(index, SEALED), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                self.finish_buffer(index, offset);
                return true;
            }
            backoff.spin();
        }
        false
    }

    fn ring(&self) -> &Arc<BufferRing> {
        &self.ring
    }

    fn discipline(&self) -> SyncDiscipline {
        SyncDiscipline::LockFree
    }
}

impl AttachPort for LockFreePort {
    const DISCIPLINE: SyncDiscipline = SyncDiscipline::LockFree;

    fn attach(ring: Arc<BufferRing>, config: &TransportConfig) -> Result<Self> {
        check_discipline(config, Self::DISCIPLINE)?;
        Ok(Self::with_retry_budget(ring, config.retries))
    }
}

impl std::fmt::Debug for LockFreePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (index, offset) = self.position();
        f.debug_struct("LockFreePort")
            .field("index", &index)
            .field("offset", &offset)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("retry_budget", &self.retry_budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::heap_ring;
    use super::*;

    #[test]
    fn pack_round_trip() {
        assert_eq!(unpack(pack(3, 904)), (3, 904));
        assert_eq!(unpack(pack(u32::MAX, CHOKED)), (u32::MAX, CHOKED));
    }

    #[test]
    fn edge_moves_cursor_to_next_buffer() {
        let ring = heap_ring(2, 1000);
        let port = LockFreePort::new(ring.clone());
        let rec = [7u8; 32];
        for _ in 0..29 {
            assert!(port.put(&rec));
        }
        assert_eq!(port.position(), (1, 0));
        assert!(ring.get_first().header().is_dirty());
        assert_eq!(ring.get_first().header().occupied(), 29 * 32);
        assert_eq!(ring.get_first().header().sequence(), 1);
    }

    #[test]
    fn chokes_then_recovers() {
        let ring = heap_ring(1, 1000);
        let port = LockFreePort::new(ring.clone());
        let rec = [7u8; 32];
        for _ in 0..29 {
            assert!(port.put(&rec));
        }
        assert_eq!(port.position(), (0, CHOKED));
        assert!(!port.put(&rec));

        ring.get_first().header().clear().unwrap();
        assert!(port.put(&rec));
        assert_eq!(port.position(), (0, 32));
    }

    #[test]
    fn starts_choked_on_dirty_first_buffer() {
        let ring = heap_ring(2, 1000);
        assert!(ring.get_first().header().mark_dirty(8, ring.next_sequence()));
        let port = LockFreePort::new(ring);
        assert_eq!(port.position(), (0, CHOKED));
        assert!(port.put(&[1u8; 32]));
        assert_eq!(port.position(), (1, 32));
    }

    #[test]
    fn flush_seals_partial_buffer() {
        let ring = heap_ring(2, 1000);
        let port = LockFreePort::new(ring.clone());
        assert!(!port.flush());
        assert!(port.put(&[1u8; 32]));
        assert!(port.flush());
        assert_eq!(ring.get_first().header().occupied(), 32);
        assert_eq!(port.position(), (1, 0));
        assert!(!port.flush());
    }
}

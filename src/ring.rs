// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The buffer ring: a segment cut into N equally sized buffers linked in a
// circle.
//
// Segment layout:
//
//   ┌────────────┬──────────────────────┬──────────────────────┬───
//   │ RingHeader │ buffer 0             │ buffer 1             │ …
//   │  64 bytes  │ header 64 │ records  │ header 64 │ records  │
//   └────────────┴──────────────────────┴──────────────────────┴───

use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::buffer::Buffer;
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::header::{BufferHeader, HEADER_SIZE};
use crate::naming;
use crate::record::LARGEST_RECORD_SIZE;
use crate::shm::{Segment, ShmSegment};
use crate::signal::{NamedSignals, Signal, SignalProvider};

pub const RING_HEADER_SIZE: usize = 64;

const MAGIC: u32 = u32::from_le_bytes(*b"EVRG");
const READY: u32 = 1;

// Offsets near u32::MAX are reserved as cursor sentinels by the lock-free
// port.
const MAX_BUFFER_SIZE: usize = (u32::MAX / 2) as usize;

#[repr(C)]
struct RingHeader {
    magic: AtomicU32,
    version: AtomicU32,
    platform: AtomicU32,
    state: AtomicU32,
    buffer_count: AtomicU32,
    record_size: AtomicU32,
    buffer_size: AtomicU64,
    next_sequence: AtomicU64,
    _pad: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == RING_HEADER_SIZE);

/// Segment bytes needed for `count` buffers of `buffer_size` bytes.
pub fn segment_len(count: usize, buffer_size: usize) -> usize {
    RING_HEADER_SIZE + count.saturating_mul(buffer_size)
}

/// Tags both sides must agree on before sharing a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTags {
    pub version: u32,
    /// Hash of the platform tag string.
    pub platform: u32,
}

impl LayoutTags {
    pub fn new(version: u32, platform: &str) -> Self {
        Self {
            version,
            platform: naming::tag_hash(platform),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.version, &config.platform)
    }
}

impl Default for LayoutTags {
    fn default() -> Self {
        Self::new(1, &crate::config::default_platform())
    }
}

pub struct BufferRing {
    name: String,
    ring_header: NonNull<RingHeader>,
    buffers: Vec<Buffer>,
    doorbell: Arc<dyn Signal>,
    buffer_size: usize,
    largest_record: usize,
    // Declared last: every pointer above refers into it.
    _segment: Box<dyn Segment>,
}

// Safety: the ring header and buffer headers are atomics in the segment,
// which the ring owns.
unsafe impl Send for BufferRing {}
unsafe impl Sync for BufferRing {}

fn invalid(msg: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, msg.to_string()))
}

impl BufferRing {
    /// Lay out a fresh ring of `count` buffers over `segment` and create its
    /// signals. Consumer side.
    ///
    /// Each buffer gets `(segment.len() - 64) / count` bytes, rounded down to
    /// a multiple of 8.
    pub fn create(
        name: &str,
        segment: Box<dyn Segment>,
        count: usize,
        signals: &dyn SignalProvider,
        tags: LayoutTags,
        largest_record: usize,
    ) -> Result<Self> {
        if count == 0 {
            return Err(invalid("buffer count is 0"));
        }
        if largest_record == 0 {
            return Err(invalid("largest record size is 0"));
        }
        let ring_header = header_ptr(segment.as_ref())?;

        let min_buffer = HEADER_SIZE + largest_record;
        let seg_len = segment.len();
        let buffer_size = if seg_len < RING_HEADER_SIZE {
            0
        } else {
            ((seg_len - RING_HEADER_SIZE) / count) & !7
        };
        if buffer_size < min_buffer {
            return Err(Error::SegmentTooSmall {
                segment: seg_len,
                count,
                min_buffer,
            });
        }
        let buffer_size = buffer_size.min(MAX_BUFFER_SIZE & !7);

        let rh = unsafe { ring_header.as_ref() };
        rh.state.store(0, Ordering::Release);

        let doorbell = signals.create(&naming::doorbell_name(name))?;
        let buffers = carve(
            name,
            segment.as_ref(),
            count,
            buffer_size,
            largest_record,
            &doorbell,
            |n| signals.create(n),
        )?;
        for b in &buffers {
            b.header().init();
        }

        rh.magic.store(MAGIC, Ordering::Relaxed);
        rh.version.store(tags.version, Ordering::Relaxed);
        rh.platform.store(tags.platform, Ordering::Relaxed);
        rh.buffer_count.store(count as u32, Ordering::Relaxed);
        rh.record_size.store(largest_record as u32, Ordering::Relaxed);
        rh.buffer_size.store(buffer_size as u64, Ordering::Relaxed);
        rh.next_sequence.store(0, Ordering::Relaxed);
        rh.state.store(READY, Ordering::Release);

        debug!(name, count, buffer_size, largest_record, "ring created");

        Ok(Self {
            name: name.to_string(),
            ring_header,
            buffers,
            doorbell,
            buffer_size,
            largest_record,
            _segment: segment,
        })
    }

    /// Attach to a ring laid out by [`create`](Self::create). Producer side.
    ///
    /// Fails with [`Error::NotInitialized`] until the creator has published
    /// the ring, and with [`Error::LayoutMismatch`] when the tags, the record
    /// size or the geometry disagree.
    pub fn open(
        name: &str,
        segment: Box<dyn Segment>,
        signals: &dyn SignalProvider,
        tags: LayoutTags,
        largest_record: usize,
    ) -> Result<Self> {
        let ring_header = header_ptr(segment.as_ref())?;
        if segment.len() < RING_HEADER_SIZE {
            return Err(Error::NotInitialized);
        }
        let rh = unsafe { ring_header.as_ref() };
        if rh.state.load(Ordering::Acquire) != READY {
            return Err(Error::NotInitialized);
        }

        expect("magic", MAGIC as u64, rh.magic.load(Ordering::Relaxed) as u64)?;
        expect("version", tags.version as u64, rh.version.load(Ordering::Relaxed) as u64)?;
        expect("platform", tags.platform as u64, rh.platform.load(Ordering::Relaxed) as u64)?;
        expect(
            "record_size",
            largest_record as u64,
            rh.record_size.load(Ordering::Relaxed) as u64,
        )?;

        let count = rh.buffer_count.load(Ordering::Relaxed) as usize;
        let buffer_size = rh.buffer_size.load(Ordering::Relaxed) as usize;
        if count == 0 {
            return Err(Error::LayoutMismatch {
                field: "buffer_count",
                expected: 1,
                found: 0,
            });
        }
        if buffer_size < HEADER_SIZE + largest_record || buffer_size > MAX_BUFFER_SIZE {
            return Err(Error::LayoutMismatch {
                field: "buffer_size",
                expected: (HEADER_SIZE + largest_record) as u64,
                found: buffer_size as u64,
            });
        }
        let needed = segment_len(count, buffer_size);
        if segment.len() < needed {
            return Err(Error::LayoutMismatch {
                field: "segment_len",
                expected: needed as u64,
                found: segment.len() as u64,
            });
        }

        let doorbell = signals.open(&naming::doorbell_name(name))?;
        let buffers = carve(
            name,
            segment.as_ref(),
            count,
            buffer_size,
            largest_record,
            &doorbell,
            |n| signals.open(n),
        )?;

        debug!(name, count, buffer_size, "ring opened");

        Ok(Self {
            name: name.to_string(),
            ring_header,
            buffers,
            doorbell,
            buffer_size,
            largest_record,
            _segment: segment,
        })
    }

    /// Consumer side: create the named shared memory segment and OS signals
    /// described by `config`, replacing leftovers of an earlier run.
    pub fn create_named(config: &TransportConfig) -> Result<Self> {
        let seg_name = naming::segment_name(&config.name);
        ShmSegment::clear_storage(&seg_name);
        let segment = ShmSegment::create(&seg_name, config.segment_len())?;
        Self::create(
            &config.name,
            Box::new(segment),
            config.buffers,
            &NamedSignals,
            LayoutTags::from_config(config),
            LARGEST_RECORD_SIZE,
        )
    }

    /// Producer side: attach to the segment and signals a consumer created
    /// with the same `config`.
    pub fn open_named(config: &TransportConfig) -> Result<Self> {
        let segment = ShmSegment::attach(&naming::segment_name(&config.name))?;
        let ring = Self::open(
            &config.name,
            Box::new(segment),
            &NamedSignals,
            LayoutTags::from_config(config),
            LARGEST_RECORD_SIZE,
        )?;
        expect("buffer_count", config.buffers as u64, ring.len() as u64)?;
        expect(
            "buffer_size",
            (config.buffer_size & !7) as u64,
            ring.buffer_size as u64,
        )?;
        Ok(ring)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Bytes per buffer slice, header included.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn largest_record(&self) -> usize {
        self.largest_record
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn buffer(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get(index)
    }

    #[inline]
    pub(crate) fn buffer_at(&self, index: usize) -> &Buffer {
        &self.buffers[index]
    }

    /// The physically first buffer.
    pub fn get_first(&self) -> &Buffer {
        &self.buffers[0]
    }

    /// First clean buffer walking the circle from the one after `from`.
    ///
    /// `from` itself is the last candidate. `None` means every buffer awaits
    /// the consumer.
    pub fn next_available(&self, from: &Buffer) -> Option<&Buffer> {
        let mut idx = from.next();
        for _ in 0..self.buffers.len() {
            let b = &self.buffers[idx];
            if b.is_clean() {
                return Some(b);
            }
            idx = b.next();
        }
        None
    }

    /// Claim the next ring-wide sequence number. The first one is 1.
    pub fn next_sequence(&self) -> u64 {
        let rh = unsafe { self.ring_header.as_ref() };
        rh.next_sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Signal posted on every dirty transition.
    pub fn doorbell(&self) -> &dyn Signal {
        self.doorbell.as_ref()
    }
}

impl std::fmt::Debug for BufferRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferRing")
            .field("name", &self.name)
            .field("buffers", &self.buffers.len())
            .field("buffer_size", &self.buffer_size)
            .field("largest_record", &self.largest_record)
            .finish()
    }
}

fn expect(field: &'static str, expected: u64, found: u64) -> Result<()> {
    if expected != found {
        return Err(Error::LayoutMismatch {
            field,
            expected,
            found,
        });
    }
    Ok(())
}

fn header_ptr(segment: &dyn Segment) -> Result<NonNull<RingHeader>> {
    let base = NonNull::new(segment.as_mut_ptr()).ok_or_else(|| invalid("segment base is null"))?;
    if base.as_ptr() as usize % 8 != 0 {
        return Err(invalid("segment is not 8-byte aligned"));
    }
    Ok(base.cast())
}

fn carve(
    name: &str,
    segment: &dyn Segment,
    count: usize,
    buffer_size: usize,
    largest_record: usize,
    doorbell: &Arc<dyn Signal>,
    mut signal: impl FnMut(&str) -> io::Result<Arc<dyn Signal>>,
) -> Result<Vec<Buffer>> {
    let base = segment.as_mut_ptr();
    let mut buffers = Vec::with_capacity(count);
    for i in 0..count {
        let slice = unsafe { base.add(RING_HEADER_SIZE + i * buffer_size) };
        let (Some(head), Some(data)) = (
            NonNull::new(slice),
            NonNull::new(unsafe { slice.add(HEADER_SIZE) }),
        ) else {
            return Err(invalid("segment base is null"));
        };
        let sig = signal(&naming::buffer_signal_name(name, i))?;
        let header = unsafe { BufferHeader::new(head, sig, doorbell.clone()) };
        buffers.push(Buffer::new(
            i,
            (i + 1) % count,
            header,
            data,
            buffer_size - HEADER_SIZE,
            largest_record,
        ));
    }
    Ok(buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::HeapSegment;
    use crate::signal::LocalSignals;

    fn ring(len: usize, count: usize) -> Result<BufferRing> {
        BufferRing::create(
            "unit",
            Box::new(HeapSegment::new(len).unwrap()),
            count,
            &LocalSignals::new(),
            LayoutTags::default(),
            32,
        )
    }

    #[test]
    fn links_form_a_circle() {
        let r = ring(segment_len(4, 256), 4).unwrap();
        let nexts: Vec<_> = r.buffers().iter().map(|b| b.next()).collect();
        assert_eq!(nexts, vec![1, 2, 3, 0]);
    }

    #[test]
    fn buffer_size_rounds_down_to_eight() {
        let r = ring(RING_HEADER_SIZE + 3 * 203, 3).unwrap();
        assert_eq!(r.buffer_size(), 200);
        assert_eq!(r.get_first().capacity(), 200 - HEADER_SIZE);
    }

    #[test]
    fn rejects_zero_count() {
        assert!(matches!(ring(1024, 0), Err(Error::Io(_))));
    }

    #[test]
    fn segment_smaller_than_header() {
        assert!(matches!(ring(16, 1), Err(Error::SegmentTooSmall { .. })));
    }

    #[test]
    fn sequence_starts_at_one() {
        let r = ring(segment_len(2, 128), 2).unwrap();
        assert_eq!(r.next_sequence(), 1);
        assert_eq!(r.next_sequence(), 2);
    }
}

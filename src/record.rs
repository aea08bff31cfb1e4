// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Event records and their fixed-size wire form.
//
// Every record kind is 32 bytes:
//
//   0        4          8              16           24        28        32
//   ┌────────┬──────────┬──────────────┬────────────┬─────────┬─────────┐
//   │ tag    │ stream   │ timestamp ns │ event id   │ tag     │ 0       │
//   └────────┴──────────┴──────────────┴────────────┴─────────┴─────────┘
//
// The trailing copy of the tag lets the decoder detect a torn or misaligned
// record.

use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

pub const LARGEST_RECORD_SIZE: usize = 32;

const TAG_OFFSET: usize = 0;
const STREAM_OFFSET: usize = 4;
const TIMESTAMP_OFFSET: usize = 8;
const EVENT_OFFSET: usize = 16;
const TRAILER_OFFSET: usize = 24;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Checkpoint = 1,
    ContextEnter = 2,
    ContextLeave = 3,
    ContextException = 4,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Checkpoint,
        EventKind::ContextEnter,
        EventKind::ContextLeave,
        EventKind::ContextException,
    ];

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(EventKind::Checkpoint),
            2 => Some(EventKind::ContextEnter),
            3 => Some(EventKind::ContextLeave),
            4 => Some(EventKind::ContextException),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Encoded size of this kind.
    pub const fn record_size(self) -> usize {
        LARGEST_RECORD_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp_ns: u64,
    pub stream_id: u32,
    pub event_id: u64,
}

impl Event {
    pub fn new(kind: EventKind, timestamp_ns: u64, stream_id: u32, event_id: u64) -> Self {
        Self {
            kind,
            timestamp_ns,
            stream_id,
            event_id,
        }
    }
}

/// Nanoseconds since the Unix epoch, 0 if the clock is before it.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// An encoded record on the stack.
#[derive(Clone, Copy)]
pub struct EncodedRecord {
    bytes: [u8; LARGEST_RECORD_SIZE],
    len: usize,
}

impl EncodedRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for EncodedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EncodedRecord").field(&self.as_bytes()).finish()
    }
}

pub trait RecordEncoder {
    /// Upper bound of [`encode`](Self::encode) output for any event.
    fn largest_record_size(&self) -> usize;

    fn encode(&self, event: &Event) -> EncodedRecord;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown record tag {tag} at offset {offset}")]
    UnknownKind { tag: u32, offset: usize },

    #[error("record at offset {offset}: leading tag {leading} != trailing tag {trailing}")]
    TagMismatch {
        leading: u32,
        trailing: u32,
        offset: usize,
    },

    #[error("truncated record at offset {offset}: {remaining} bytes left")]
    Truncated { remaining: usize, offset: usize },
}

/// The record codec, generic over byte order.
pub struct RecordCodec<E: ByteOrder = LittleEndian> {
    _order: PhantomData<E>,
}

impl<E: ByteOrder> RecordCodec<E> {
    pub const fn new() -> Self {
        Self {
            _order: PhantomData,
        }
    }

    /// Decode the record at the start of `bytes`. Returns the event and the
    /// number of bytes it spans.
    pub fn decode(&self, bytes: &[u8]) -> Result<(Event, usize), DecodeError> {
        self.decode_at(bytes, 0)
    }

    fn decode_at(&self, bytes: &[u8], offset: usize) -> Result<(Event, usize), DecodeError> {
        if bytes.len() < 4 {
            return Err(DecodeError::Truncated {
                remaining: bytes.len(),
                offset,
            });
        }
        let tag = E::read_u32(&bytes[TAG_OFFSET..]);
        let kind = EventKind::from_tag(tag).ok_or(DecodeError::UnknownKind { tag, offset })?;
        let size = kind.record_size();
        if bytes.len() < size {
            return Err(DecodeError::Truncated {
                remaining: bytes.len(),
                offset,
            });
        }
        let trailing = E::read_u32(&bytes[TRAILER_OFFSET..]);
        if trailing != tag {
            return Err(DecodeError::TagMismatch {
                leading: tag,
                trailing,
                offset,
            });
        }
        let event = Event {
            kind,
            stream_id: E::read_u32(&bytes[STREAM_OFFSET..]),
            timestamp_ns: E::read_u64(&bytes[TIMESTAMP_OFFSET..]),
            event_id: E::read_u64(&bytes[EVENT_OFFSET..]),
        };
        Ok((event, size))
    }

    /// Iterate over the records packed in `bytes`.
    pub fn reader<'a>(&self, bytes: &'a [u8]) -> RecordReader<'a, E> {
        RecordReader {
            codec: RecordCodec::new(),
            bytes,
            offset: 0,
            skipped: 0,
        }
    }
}

impl<E: ByteOrder> RecordEncoder for RecordCodec<E> {
    fn largest_record_size(&self) -> usize {
        LARGEST_RECORD_SIZE
    }

    fn encode(&self, event: &Event) -> EncodedRecord {
        let mut bytes = [0u8; LARGEST_RECORD_SIZE];
        let tag = event.kind.tag();
        E::write_u32(&mut bytes[TAG_OFFSET..], tag);
        E::write_u32(&mut bytes[STREAM_OFFSET..], event.stream_id);
        E::write_u64(&mut bytes[TIMESTAMP_OFFSET..], event.timestamp_ns);
        E::write_u64(&mut bytes[EVENT_OFFSET..], event.event_id);
        E::write_u32(&mut bytes[TRAILER_OFFSET..], tag);
        EncodedRecord {
            bytes,
            len: event.kind.record_size(),
        }
    }
}

impl<E: ByteOrder> Default for RecordCodec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ByteOrder> Clone for RecordCodec<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: ByteOrder> Copy for RecordCodec<E> {}

impl<E: ByteOrder> std::fmt::Debug for RecordCodec<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecordCodec")
    }
}

/// Iterator over the records of one drained buffer.
///
/// Stops at the first record that fails to decode; the rest of the buffer is
/// counted in [`skipped_bytes`](Self::skipped_bytes).
pub struct RecordReader<'a, E: ByteOrder = LittleEndian> {
    codec: RecordCodec<E>,
    bytes: &'a [u8],
    offset: usize,
    skipped: usize,
}

impl<E: ByteOrder> RecordReader<'_, E> {
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }
}

impl<E: ByteOrder> Iterator for RecordReader<'_, E> {
    type Item = Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let rest = &self.bytes[self.offset..];
        match self.codec.decode_at(rest, self.offset) {
            Ok((event, size)) => {
                self.offset += size;
                Some(Ok(event))
            }
            Err(e) => {
                self.skipped = rest.len();
                self.offset = self.bytes.len();
                Some(Err(e))
            }
        }
    }
}

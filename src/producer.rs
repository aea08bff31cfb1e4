// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Event emission API for instrumented code.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::config::TransportConfig;
use crate::error::Result;
use crate::port::{PlacementPort, Port};
use crate::record::{Event, EventKind, RecordCodec, RecordEncoder};
use crate::ring::BufferRing;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerStats {
    pub emitted: u64,
    pub dropped: u64,
}

/// Encodes events and places them through a port. Never blocks on the
/// consumer: an event that does not fit is dropped and counted.
pub struct Producer<P: PlacementPort, E: ByteOrder = LittleEndian> {
    port: P,
    codec: RecordCodec<E>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl Producer<Port, LittleEndian> {
    /// Attach to the named ring a consumer created with the same `config`.
    pub fn connect(config: &TransportConfig) -> Result<Self> {
        let ring = Arc::new(BufferRing::open_named(config)?);
        Ok(Self::new(Port::attach(ring, config)?))
    }
}

impl<P: PlacementPort, E: ByteOrder> Producer<P, E> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            codec: RecordCodec::new(),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn emit(&self, event: &Event) -> bool {
        let record = self.codec.encode(event);
        let placed = self.port.put(record.as_bytes());
        let counter = if placed { &self.emitted } else { &self.dropped };
        counter.fetch_add(1, Ordering::Relaxed);
        placed
    }

    pub fn emit_checkpoint(&self, timestamp_ns: u64, stream_id: u32, event_id: u64) -> bool {
        self.emit(&Event::new(EventKind::Checkpoint, timestamp_ns, stream_id, event_id))
    }

    pub fn emit_context_enter(&self, timestamp_ns: u64, stream_id: u32, event_id: u64) -> bool {
        self.emit(&Event::new(EventKind::ContextEnter, timestamp_ns, stream_id, event_id))
    }

    pub fn emit_context_leave(&self, timestamp_ns: u64, stream_id: u32, event_id: u64) -> bool {
        self.emit(&Event::new(EventKind::ContextLeave, timestamp_ns, stream_id, event_id))
    }

    pub fn emit_context_exception(&self, timestamp_ns: u64, stream_id: u32, event_id: u64) -> bool {
        self.emit(&Event::new(
            EventKind::ContextException,
            timestamp_ns,
            stream_id,
            event_id,
        ))
    }

    /// Hand the current buffer to the consumer if it holds anything.
    pub fn flush(&self) -> bool {
        self.port.flush()
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<P: PlacementPort + std::fmt::Debug, E: ByteOrder> std::fmt::Debug for Producer<P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("port", &self.port)
            .field("stats", &self.stats())
            .finish()
    }
}

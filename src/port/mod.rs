// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Producer-side placement of records into the ring.

mod exclusive;
mod lockfree;
mod synchronized;

use std::sync::Arc;

pub use exclusive::ExclusivePort;
pub use lockfree::{LockFreePort, DEFAULT_RETRY_BUDGET};
pub use synchronized::SynchronizedPort;

use crate::buffer::Buffer;
use crate::config::{ConfigError, SyncDiscipline, TransportConfig};
use crate::error::{Error, Result};
use crate::ring::BufferRing;

/// Writes whole records into the ring, never blocking on the consumer.
pub trait PlacementPort {
    /// Place one encoded record. `false` means the record was dropped: the
    /// ring is full, the retry budget ran out, or the record is empty or
    /// larger than the ring's largest record size.
    fn put(&self, record: &[u8]) -> bool;

    /// Hand a partially filled buffer to the consumer. `false` if the
    /// current buffer holds nothing.
    fn flush(&self) -> bool;

    fn ring(&self) -> &Arc<BufferRing>;

    fn discipline(&self) -> SyncDiscipline;
}

/// A port type that can be built from configuration.
pub trait AttachPort: PlacementPort + Sized {
    const DISCIPLINE: SyncDiscipline;

    /// Fails when `config.sync` names a different discipline.
    fn attach(ring: Arc<BufferRing>, config: &TransportConfig) -> Result<Self>;
}

pub(crate) fn check_discipline(config: &TransportConfig, wanted: SyncDiscipline) -> Result<()> {
    if config.sync != wanted {
        return Err(Error::Config(ConfigError::InvalidValue {
            key: "sync",
            value: config.sync.to_string(),
        }));
    }
    Ok(())
}

#[inline]
pub(crate) fn record_fits(ring: &BufferRing, record: &[u8]) -> bool {
    !record.is_empty() && record.len() <= ring.largest_record()
}

/// Write position of a single-writer port.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    current: usize,
    free: usize,
}

impl Cursor {
    /// Starts on the first buffer; if that one still awaits the consumer the
    /// cursor is parked past the mark so the first `place` moves on.
    pub(crate) fn new(ring: &BufferRing) -> Self {
        let first = ring.get_first();
        let free = if first.is_clean() { 0 } else { first.capacity() };
        Self { current: 0, free }
    }

    pub(crate) fn place(&mut self, ring: &BufferRing, record: &[u8]) -> bool {
        let mut buf: &Buffer = ring.buffer_at(self.current);
        if self.free > buf.high_water_mark() {
            match ring.next_available(buf) {
                Some(next) => {
                    buf = next;
                    self.current = next.index();
                    self.free = 0;
                }
                None => return false,
            }
        }

        // free <= high_water_mark and len <= largest_record keep the span
        // inside the record area.
        unsafe { buf.write_at(self.free, record) };
        self.free += record.len();

        if self.free > buf.high_water_mark() {
            buf.header().mark_dirty(self.free as u64, ring.next_sequence());
        }
        true
    }

    pub(crate) fn flush(&mut self, ring: &BufferRing) -> bool {
        let buf = ring.buffer_at(self.current);
        if self.free == 0 || self.free > buf.high_water_mark() {
            return false;
        }
        let marked = buf.header().mark_dirty(self.free as u64, ring.next_sequence());
        self.free = buf.capacity();
        marked
    }
}

/// A port whose discipline is chosen by configuration.
#[derive(Debug)]
pub enum Port {
    Synchronized(SynchronizedPort),
    Exclusive(ExclusivePort),
    LockFree(LockFreePort),
}

impl Port {
    pub fn attach(ring: Arc<BufferRing>, config: &TransportConfig) -> Result<Self> {
        Ok(match config.sync {
            SyncDiscipline::Synchronized => Port::Synchronized(SynchronizedPort::attach(ring, config)?),
            SyncDiscipline::Exclusive => Port::Exclusive(ExclusivePort::attach(ring, config)?),
            SyncDiscipline::LockFree => Port::LockFree(LockFreePort::attach(ring, config)?),
        })
    }
}

impl PlacementPort for Port {
    fn put(&self, record: &[u8]) -> bool {
        match self {
            Port::Synchronized(p) => p.put(record),
            Port::Exclusive(p) => p.put(record),
            Port::LockFree(p) => p.put(record),
        }
    }

    fn flush(&self) -> bool {
        match self {
            Port::Synchronized(p) => p.flush(),
            Port::Exclusive(p) => p.flush(),
            Port::LockFree(p) => p.flush(),
        }
    }

    fn ring(&self) -> &Arc<BufferRing> {
        match self {
            Port::Synchronized(p) => p.ring(),
            Port::Exclusive(p) => p.ring(),
            Port::LockFree(p) => p.ring(),
        }
    }

    fn discipline(&self) -> SyncDiscipline {
        match self {
            Port::Synchronized(p) => p.discipline(),
            Port::Exclusive(p) => p.discipline(),
            Port::LockFree(p) => p.discipline(),
        }
    }
}

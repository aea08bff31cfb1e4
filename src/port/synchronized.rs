// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::cell::Cell;
use std::sync::Arc;

use super::{check_discipline, record_fits, AttachPort, Cursor, PlacementPort};
use crate::config::{SyncDiscipline, TransportConfig};
use crate::error::Result;
use crate::ring::BufferRing;

/// Single-writer port. The `Cell` makes it `!Sync`, so only one thread can
/// ever call `put`.
#[derive(Debug)]
pub struct SynchronizedPort {
    ring: Arc<BufferRing>,
    cursor: Cell<Cursor>,
}

impl SynchronizedPort {
    pub fn new(ring: Arc<BufferRing>) -> Self {
        let cursor = Cursor::new(&ring);
        Self {
            ring,
            cursor: Cell::new(cursor),
        }
    }
}

impl PlacementPort for SynchronizedPort {
    fn put(&self, record: &[u8]) -> bool {
        if !record_fits(&self.ring, record) {
            return false;
        }
        let mut c = self.cursor.get();
        let placed = c.place(&self.ring, record);
        self.cursor.set(c);
        placed
    }

    fn flush(&self) -> bool {
        let mut c = self.cursor.get();
        let flushed = c.flush(&self.ring);
        self.cursor.set(c);
        flushed
    }

    fn ring(&self) -> &Arc<BufferRing> {
        &self.ring
    }

    fn discipline(&self) -> SyncDiscipline {
        SyncDiscipline::Synchronized
    }
}

impl AttachPort for SynchronizedPort {
    const DISCIPLINE: SyncDiscipline = SyncDiscipline::Synchronized;

    fn attach(ring: Arc<BufferRing>, config: &TransportConfig) -> Result<Self> {
        check_discipline(config, Self::DISCIPLINE)?;
        Ok(Self::new(ring))
    }
}

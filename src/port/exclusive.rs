// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::sync::{Arc, Mutex, PoisonError};

use super::{check_discipline, record_fits, AttachPort, Cursor, PlacementPort};
use crate::config::{SyncDiscipline, TransportConfig};
use crate::error::Result;
use crate::ring::BufferRing;

/// Multi-writer port serialising every `put` behind one mutex.
#[derive(Debug)]
pub struct ExclusivePort {
    ring: Arc<BufferRing>,
    cursor: Mutex<Cursor>,
}

impl ExclusivePort {
    pub fn new(ring: Arc<BufferRing>) -> Self {
        let cursor = Cursor::new(&ring);
        Self {
            ring,
            cursor: Mutex::new(cursor),
        }
    }
}

impl PlacementPort for ExclusivePort {
    fn put(&self, record: &[u8]) -> bool {
        if !record_fits(&self.ring, record) {
            return false;
        }
        // The cursor is two offsets; a panicking holder cannot leave it torn.
        let mut c = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        c.place(&self.ring, record)
    }

    fn flush(&self) -> bool {
        let mut c = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        c.flush(&self.ring)
    }

    fn ring(&self) -> &Arc<BufferRing> {
        &self.ring
    }

    fn discipline(&self) -> SyncDiscipline {
        SyncDiscipline::Exclusive
    }
}

impl AttachPort for ExclusivePort {
    const DISCIPLINE: SyncDiscipline = SyncDiscipline::Exclusive;

    fn attach(ring: Arc<BufferRing>, config: &TransportConfig) -> Result<Self> {
        check_discipline(config, Self::DISCIPLINE)?;
        Ok(Self::new(ring))
    }
}

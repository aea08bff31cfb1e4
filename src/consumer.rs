// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Consumer side: drain dirty buffers in sequence order and decode them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error, warn};

use crate::config::{StalePolicy, TransportConfig};
use crate::error::{Error, Result, SequenceError};
use crate::record::{Event, RecordCodec};
use crate::ring::BufferRing;

/// Receives decoded events.
pub trait RecordSink {
    fn on_event(&mut self, sequence: u64, event: &Event);

    /// A buffer stopped decoding early; `skipped_bytes` were not delivered.
    fn on_corrupt(&mut self, sequence: u64, skipped_bytes: usize) {
        warn!(sequence, skipped_bytes, "corrupt buffer");
    }
}

impl<F: FnMut(u64, &Event)> RecordSink for F {
    fn on_event(&mut self, sequence: u64, event: &Event) {
        self(sequence, event)
    }
}

// ---------------------------------------------------------------------------
// SequenceTracker
// ---------------------------------------------------------------------------

/// Outcome of admitting one buffer's sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Exactly the next expected sequence.
    Deliver,
    /// Ahead by the given number of sequences, within the skip window.
    DeliverAfterGap(u64),
    /// Older than expected and tolerated by policy; do not deliver.
    Stale,
}

/// Checks that drained buffers arrive as 1, 2, 3, … .
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    next: u64,
    max_skip: u64,
    stale: StalePolicy,
    last_in_batch: Option<u64>,
}

impl SequenceTracker {
    pub fn new(max_skip: u64, stale: StalePolicy) -> Self {
        Self {
            next: 1,
            max_skip,
            stale,
            last_in_batch: None,
        }
    }

    /// Next sequence the tracker expects.
    pub fn expected(&self) -> u64 {
        self.next
    }

    /// Start a new sorted batch.
    pub fn begin_batch(&mut self) {
        self.last_in_batch = None;
    }

    /// Admit `seq`. Batches must be fed in ascending order.
    pub fn admit(&mut self, seq: u64) -> std::result::Result<Admission, SequenceError> {
        if seq == 0 {
            return Err(SequenceError::Zero);
        }
        if self.last_in_batch == Some(seq) {
            return Err(SequenceError::Duplicate { seq });
        }
        self.last_in_batch = Some(seq);

        let expected = self.next;
        if seq == expected {
            self.next += 1;
            return Ok(Admission::Deliver);
        }
        if seq > expected {
            self.next = seq + 1;
            let gap = seq - expected;
            if gap > self.max_skip {
                return Err(SequenceError::Desync { seq, expected });
            }
            warn!(seq, expected, gap, "sequence gap");
            return Ok(Admission::DeliverAfterGap(gap));
        }
        if expected - seq > self.max_skip {
            return Err(SequenceError::Backwards { seq, expected });
        }
        match self.stale {
            StalePolicy::Skip => {
                warn!(seq, expected, "skipping stale buffer");
                Ok(Admission::Stale)
            }
            StalePolicy::Error => Err(SequenceError::Stale { seq, expected }),
        }
    }
}

// ---------------------------------------------------------------------------
// DrainLoop
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub buffers: u64,
    pub events: u64,
    pub stale_skipped: u64,
    pub gap_skipped: u64,
    pub corrupt_bytes: u64,
    /// Buffers refused by the sequence check.
    pub rejected: u64,
}

/// Stops a running [`DrainLoop`] from another thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    ring: Arc<BufferRing>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.ring.doorbell().post() {
            warn!("waking drain loop failed: {e}");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct Drained {
    sequence: u64,
    occupied: u64,
    bytes: Option<Vec<u8>>,
}

pub struct DrainLoop<E: ByteOrder = LittleEndian> {
    ring: Arc<BufferRing>,
    codec: RecordCodec<E>,
    tracker: SequenceTracker,
    stop: Arc<AtomicBool>,
    timeout_ms: u64,
    stats: DrainStats,
}

impl DrainLoop<LittleEndian> {
    /// Create the named ring described by `config` and a loop draining it.
    pub fn create(config: &TransportConfig) -> Result<Self> {
        let ring = Arc::new(BufferRing::create_named(config)?);
        Ok(Self::new(ring, config))
    }
}

impl<E: ByteOrder> DrainLoop<E> {
    /// Drain `ring` with the sequence policy and timeout of `config`.
    pub fn new(ring: Arc<BufferRing>, config: &TransportConfig) -> Self {
        Self {
            ring,
            codec: RecordCodec::new(),
            tracker: SequenceTracker::new(config.max_skip, config.stale),
            stop: Arc::new(AtomicBool::new(false)),
            timeout_ms: config.timeout_ms,
            stats: DrainStats::default(),
        }
    }

    pub fn ring(&self) -> &Arc<BufferRing> {
        &self.ring
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop.clone(),
            ring: self.ring.clone(),
        }
    }

    pub fn stats(&self) -> DrainStats {
        self.stats
    }

    /// Collect every dirty buffer, clear it, and deliver the batch in
    /// sequence order. Returns the number of buffers taken.
    ///
    /// The whole batch is processed even when a buffer is rejected or
    /// fails to clear; the first such error is returned afterwards.
    pub fn drain_once(&mut self, sink: &mut impl RecordSink) -> Result<usize> {
        let mut first_err = None;
        let mut batch = Vec::new();
        loop {
            let before = batch.len();
            for buf in self.ring.buffers() {
                let header = buf.header();
                if !header.is_dirty() {
                    continue;
                }
                let sequence = header.sequence();
                let occupied = header.occupied();
                let bytes = if occupied == 0 || occupied > buf.capacity() as u64 {
                    None
                } else {
                    let mut out = Vec::with_capacity(occupied as usize);
                    // Dirty: no producer touches it until we clear it.
                    unsafe { buf.copy_out(occupied as usize, &mut out) };
                    Some(out)
                };
                if let Err(e) = header.clear() {
                    error!(ring = self.ring.name(), buffer = buf.index(), "clearing buffer: {e}");
                    first_err.get_or_insert(Error::Io(e));
                }
                batch.push(Drained {
                    sequence,
                    occupied,
                    bytes,
                });
            }
            if batch.len() == before {
                break;
            }
        }
        batch.sort_by_key(|d| d.sequence);
        self.tracker.begin_batch();

        let taken = batch.len();
        for d in batch {
            self.stats.buffers += 1;
            match self.tracker.admit(d.sequence) {
                Ok(Admission::Deliver) => {}
                Ok(Admission::DeliverAfterGap(gap)) => self.stats.gap_skipped += gap,
                Ok(Admission::Stale) => {
                    self.stats.stale_skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(ring = self.ring.name(), "rejecting buffer: {e}");
                    self.stats.rejected += 1;
                    first_err.get_or_insert(Error::Sequence(e));
                    continue;
                }
            }

            let Some(bytes) = d.bytes else {
                self.stats.corrupt_bytes += d.occupied.min(self.ring.buffer_size() as u64);
                sink.on_corrupt(d.sequence, d.occupied as usize);
                continue;
            };
            let mut reader = self.codec.reader(&bytes);
            for item in reader.by_ref() {
                match item {
                    Ok(event) => {
                        self.stats.events += 1;
                        sink.on_event(d.sequence, &event);
                    }
                    Err(e) => debug!(sequence = d.sequence, "decode stopped: {e}"),
                }
            }
            let skipped = reader.skipped_bytes();
            if skipped > 0 {
                self.stats.corrupt_bytes += skipped as u64;
                sink.on_corrupt(d.sequence, skipped);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(taken),
        }
    }

    /// Wait for the doorbell (at most the configured timeout) and drain.
    pub fn wait_and_drain(&mut self, sink: &mut impl RecordSink) -> Result<usize> {
        if self.stop.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let doorbell = self.ring.doorbell();
        if doorbell.wait(Some(self.timeout_ms))? {
            // One wake-up covers every post so far; the scan finds them all.
            doorbell.reset()?;
        }
        self.drain_once(sink)
    }

    /// Drain until stopped, then take whatever is left.
    ///
    /// Buffers refused by the sequence check are logged and counted in
    /// [`DrainStats::rejected`]; the tracker has resynchronised by then, so
    /// the loop keeps going. Any other error ends it.
    pub fn run(&mut self, sink: &mut impl RecordSink) -> Result<DrainStats> {
        debug!(ring = self.ring.name(), "drain loop started");
        while !self.stop.load(Ordering::SeqCst) {
            tolerate_sequence(self.wait_and_drain(sink))?;
        }
        tolerate_sequence(self.drain_once(sink))?;
        debug!(ring = self.ring.name(), buffers = self.stats.buffers, "drain loop stopped");
        Ok(self.stats)
    }
}

fn tolerate_sequence(res: Result<usize>) -> Result<usize> {
    match res {
        Err(Error::Sequence(_)) => Ok(0),
        other => other,
    }
}

impl<E: ByteOrder> std::fmt::Debug for DrainLoop<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainLoop")
            .field("ring", &self.ring)
            .field("expected", &self.tracker.expected())
            .field("stats", &self.stats)
            .finish()
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Drain loop: batch ordering, sequence policy, corrupt buffers, stopping.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evring::{
    segment_len, BufferRing, DrainLoop, Error, Event, EventKind, HeapSegment, LayoutTags,
    LocalSignals, Producer, RecordCodec, RecordEncoder, RecordSink, Segment, SequenceError, Signal,
    SignalProvider, SynchronizedPort, TransportConfig, HEADER_SIZE, LARGEST_RECORD_SIZE, RING_HEADER_SIZE,
};

const BUFFER_SIZE: usize = 1000;

struct Fixture {
    seg: HeapSegment,
    ring: Arc<BufferRing>,
}

impl Fixture {
    fn new(count: usize) -> Self {
        Self::with_signals(count, &LocalSignals::new())
    }

    fn with_signals(count: usize, signals: &dyn SignalProvider) -> Self {
        let seg = HeapSegment::new(segment_len(count, BUFFER_SIZE)).unwrap();
        let ring = BufferRing::create(
            "drain",
            Box::new(seg.clone()),
            count,
            signals,
            LayoutTags::default(),
            LARGEST_RECORD_SIZE,
        )
        .unwrap();
        Self {
            seg,
            ring: Arc::new(ring),
        }
    }

    fn drain(&self, config: &str) -> DrainLoop {
        let config: TransportConfig = config.parse().unwrap();
        DrainLoop::new(self.ring.clone(), &config)
    }

    /// Write raw bytes into buffer `index` at `offset` of its record area.
    fn write(&self, index: usize, offset: usize, bytes: &[u8]) {
        let at = RING_HEADER_SIZE + index * BUFFER_SIZE + HEADER_SIZE + offset;
        assert!(at + bytes.len() <= self.seg.len());
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.seg.as_mut_ptr().add(at), bytes.len())
        };
    }

    /// Fill buffer `index` with `events` and hand it over as `sequence`.
    fn publish(&self, index: usize, sequence: u64, events: &[Event]) {
        let codec: RecordCodec = RecordCodec::new();
        let mut offset = 0;
        for ev in events {
            let rec = codec.encode(ev);
            self.write(index, offset, rec.as_bytes());
            offset += rec.len();
        }
        assert!(self.ring.buffers()[index]
            .header()
            .mark_dirty(offset as u64, sequence));
    }
}

fn checkpoint(id: u64) -> Event {
    Event::new(EventKind::Checkpoint, 1_000 + id, 7, id)
}

#[derive(Default)]
struct Collect {
    events: Vec<(u64, Event)>,
    corrupt: Vec<(u64, usize)>,
}

impl RecordSink for Collect {
    fn on_event(&mut self, sequence: u64, event: &Event) {
        self.events.push((sequence, *event));
    }

    fn on_corrupt(&mut self, sequence: u64, skipped_bytes: usize) {
        self.corrupt.push((sequence, skipped_bytes));
    }
}

impl Collect {
    fn ids(&self) -> Vec<u64> {
        self.events.iter().map(|(_, e)| e.event_id).collect()
    }

    fn sequences(&self) -> Vec<u64> {
        let mut s: Vec<u64> = self.events.iter().map(|(s, _)| *s).collect();
        s.dedup();
        s
    }
}

#[test]
fn empty_ring_drains_nothing() {
    let fx = Fixture::new(3);
    let mut drain = fx.drain("");
    let mut sink = Collect::default();
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 0);
    assert_eq!(drain.stats().buffers, 0);
}

#[test]
fn wait_and_drain_times_out() {
    let fx = Fixture::new(2);
    let mut drain = fx.drain("timeout_ms=20");
    let start = Instant::now();
    assert_eq!(drain.wait_and_drain(&mut Collect::default()).unwrap(), 0);
    assert!(start.elapsed() >= Duration::from_millis(15));
}

#[test]
fn batch_is_delivered_in_sequence_order_across_wrap() {
    let fx = Fixture::new(3);
    let producer: Producer<_> = Producer::new(SynchronizedPort::new(fx.ring.clone()));
    let mut drain = fx.drain("");
    let mut sink = Collect::default();

    let mut id = 0;
    let mut emit = |n: u64| {
        for _ in 0..n {
            assert!(producer.emit_checkpoint(1_000 + id, 7, id));
            id += 1;
        }
    };

    // Buffers 0 and 1 carry sequences 1 and 2.
    emit(2 * 29);
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 2);

    // Buffer 2 gets 3, then the producer wraps to buffer 0 for 4: the
    // scan meets 4 before 3.
    emit(2 * 29);
    assert_eq!(fx.ring.buffers()[0].header().sequence(), 4);
    assert_eq!(fx.ring.buffers()[2].header().sequence(), 3);
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 2);

    assert_eq!(sink.sequences(), vec![1, 2, 3, 4]);
    assert_eq!(sink.ids(), (0..4 * 29).collect::<Vec<u64>>());
    assert!(fx.ring.buffers().iter().all(|b| b.is_clean()));
    assert!(sink.corrupt.is_empty());
}

#[test]
fn corrupt_tail_is_reported_after_good_records() {
    let fx = Fixture::new(2);
    let codec: RecordCodec = RecordCodec::new();
    let good = codec.encode(&checkpoint(1));
    fx.write(0, 0, good.as_bytes());
    fx.write(0, 32, &[0x5a; 32]);
    assert!(fx.ring.get_first().header().mark_dirty(64, 1));

    let mut drain = fx.drain("");
    let mut sink = Collect::default();
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 1);

    assert_eq!(sink.events, vec![(1, checkpoint(1))]);
    assert_eq!(sink.corrupt, vec![(1, 32)]);
    assert_eq!(drain.stats().corrupt_bytes, 32);
    assert!(fx.ring.get_first().is_clean());
}

#[test]
fn impossible_occupied_count_skips_the_buffer() {
    let fx = Fixture::new(2);
    let capacity = fx.ring.get_first().capacity() as u64;
    assert!(fx.ring.get_first().header().mark_dirty(capacity + 8, 1));
    fx.publish(1, 2, &[checkpoint(5)]);

    let mut drain = fx.drain("");
    let mut sink = Collect::default();
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 2);
    assert_eq!(sink.corrupt, vec![(1, capacity as usize + 8)]);
    assert_eq!(sink.events, vec![(2, checkpoint(5))]);
}

#[test]
fn far_jump_is_rejected_after_the_batch() {
    let fx = Fixture::new(3);
    fx.publish(0, 1, &[checkpoint(1)]);
    fx.publish(1, 200, &[checkpoint(2)]);
    fx.publish(2, 201, &[checkpoint(3)]);

    let mut drain = fx.drain("max_skip=4");
    let mut sink = Collect::default();
    let err = drain.drain_once(&mut sink).err().unwrap();
    assert!(matches!(
        err,
        Error::Sequence(SequenceError::Desync { seq: 200, expected: 2 })
    ));

    // The rejected buffer is dropped, the rest of the batch still arrives.
    assert_eq!(sink.ids(), vec![1, 3]);
    assert!(fx.ring.buffers().iter().all(|b| b.is_clean()));

    fx.publish(0, 202, &[checkpoint(4)]);
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 1);
    assert_eq!(sink.ids(), vec![1, 3, 4]);
}

#[test]
fn duplicate_sequence_in_batch() {
    let fx = Fixture::new(2);
    fx.publish(0, 1, &[checkpoint(1)]);
    fx.publish(1, 1, &[checkpoint(2)]);

    let mut drain = fx.drain("");
    let mut sink = Collect::default();
    let err = drain.drain_once(&mut sink).err().unwrap();
    assert!(matches!(err, Error::Sequence(SequenceError::Duplicate { seq: 1 })));
    assert_eq!(sink.events.len(), 1);
}

#[test]
fn zero_sequence_is_rejected() {
    let fx = Fixture::new(2);
    fx.publish(0, 0, &[checkpoint(1)]);
    let mut drain = fx.drain("");
    let err = drain.drain_once(&mut Collect::default()).err().unwrap();
    assert!(matches!(err, Error::Sequence(SequenceError::Zero)));
}

#[test]
fn small_gap_is_delivered_and_counted() {
    let fx = Fixture::new(2);
    fx.publish(0, 1, &[checkpoint(1)]);
    fx.publish(1, 4, &[checkpoint(2)]);

    let mut drain = fx.drain("");
    let mut sink = Collect::default();
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 2);
    assert_eq!(sink.sequences(), vec![1, 4]);
    assert_eq!(drain.stats().gap_skipped, 2);
}

#[test]
fn stale_buffer_follows_policy() {
    for (config, tolerated) in [("stale=skip", true), ("stale=error", false)] {
        let fx = Fixture::new(3);
        let mut drain = fx.drain(config);
        let mut sink = Collect::default();
        for seq in 1..=3 {
            fx.publish(0, seq, &[checkpoint(seq)]);
            drain.drain_once(&mut sink).unwrap();
        }

        fx.publish(1, 2, &[checkpoint(99)]);
        let res = drain.drain_once(&mut sink);
        if tolerated {
            assert_eq!(res.unwrap(), 1);
            assert_eq!(drain.stats().stale_skipped, 1);
        } else {
            assert!(matches!(
                res,
                Err(Error::Sequence(SequenceError::Stale { seq: 2, expected: 4 }))
            ));
        }
        assert_eq!(sink.ids(), vec![1, 2, 3]);
    }
}

#[test]
fn clear_is_idempotent() {
    let fx = Fixture::new(2);
    let header = fx.ring.get_first().header();
    header.clear().unwrap();
    assert!(header.is_clean());

    fx.publish(0, 1, &[checkpoint(1)]);
    header.clear().unwrap();
    header.clear().unwrap();
    assert!(header.is_clean());
    assert_eq!(header.occupied(), 0);
    assert_eq!(header.sequence(), 0);
}

#[test]
fn stop_handle_ends_run() {
    let fx = Fixture::new(3);
    let mut drain = fx.drain("timeout_ms=1000");
    let stop = drain.stop_handle();
    let ring = fx.ring.clone();

    let runner = thread::spawn(move || {
        let mut sink = Collect::default();
        let stats = drain.run(&mut sink).unwrap();
        (stats, sink.events.len())
    });

    let producer: Producer<_> = Producer::new(SynchronizedPort::new(ring));
    for id in 0..40 {
        assert!(producer.emit_checkpoint(id, 1, id));
    }
    assert!(producer.flush());

    thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    stop.stop();
    assert!(stop.is_stopped());
    let (stats, events) = runner.join().unwrap();

    // The stop post wakes the loop long before its timeout.
    assert!(start.elapsed() < Duration::from_millis(900));
    assert_eq!(events, 40);
    assert_eq!(stats.events, 40);
    assert_eq!(stats.buffers, 2);
}

#[test]
fn run_after_stop_takes_what_is_left() {
    let fx = Fixture::new(2);
    fx.publish(1, 1, &[checkpoint(1), checkpoint(2)]);
    let mut drain = fx.drain("");
    drain.stop_handle().stop();

    let mut sink = Collect::default();
    let stats = drain.run(&mut sink).unwrap();
    assert_eq!(stats.events, 2);
    assert_eq!(sink.ids(), vec![1, 2]);
}

/// Local signals whose `reset` fails while `failing` is set.
struct FlakySignals {
    inner: LocalSignals,
    failing: Arc<AtomicBool>,
}

struct FlakySignal {
    inner: Arc<dyn Signal>,
    failing: Arc<AtomicBool>,
}

impl Signal for FlakySignal {
    fn post(&self) -> io::Result<()> {
        self.inner.post()
    }

    fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait(timeout_ms)
    }

    fn try_wait(&self) -> io::Result<bool> {
        self.inner.try_wait()
    }

    fn reset(&self) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("reset refused"));
        }
        self.inner.reset()
    }
}

impl SignalProvider for FlakySignals {
    fn create(&self, name: &str) -> io::Result<Arc<dyn Signal>> {
        Ok(Arc::new(FlakySignal {
            inner: self.inner.create(name)?,
            failing: self.failing.clone(),
        }))
    }

    fn open(&self, name: &str) -> io::Result<Arc<dyn Signal>> {
        Ok(Arc::new(FlakySignal {
            inner: self.inner.open(name)?,
            failing: self.failing.clone(),
        }))
    }
}

#[test]
fn failed_clear_still_delivers_the_batch() {
    let failing = Arc::new(AtomicBool::new(false));
    let fx = Fixture::with_signals(
        3,
        &FlakySignals {
            inner: LocalSignals::new(),
            failing: failing.clone(),
        },
    );
    fx.publish(0, 1, &[checkpoint(1)]);
    fx.publish(1, 2, &[checkpoint(2), checkpoint(3)]);

    let mut drain = fx.drain("");
    let mut sink = Collect::default();
    failing.store(true, Ordering::SeqCst);
    let err = drain.drain_once(&mut sink).err().unwrap();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(sink.ids(), vec![1, 2, 3]);
    assert_eq!(drain.stats().buffers, 2);

    // The buffers went back to the producers and the sequence carries on.
    assert!(fx.ring.buffers().iter().all(|b| b.is_clean()));
    assert_eq!(fx.ring.get_first().header().sequence(), 0);
    failing.store(false, Ordering::SeqCst);
    fx.publish(2, 3, &[checkpoint(4)]);
    assert_eq!(drain.drain_once(&mut sink).unwrap(), 1);
    assert_eq!(sink.ids(), vec![1, 2, 3, 4]);
}

#[test]
fn run_survives_a_desync() {
    let fx = Fixture::new(3);
    let mut drain = fx.drain("max_skip=4,timeout_ms=10");
    let stop = drain.stop_handle();
    let runner = thread::spawn(move || {
        let mut sink = Collect::default();
        let stats = drain.run(&mut sink).unwrap();
        (stats, sink.ids())
    });

    fx.publish(0, 1, &[checkpoint(1)]);
    fx.publish(1, 200, &[checkpoint(2)]);
    thread::sleep(Duration::from_millis(50));
    fx.publish(2, 201, &[checkpoint(3)]);
    thread::sleep(Duration::from_millis(50));
    stop.stop();

    let (stats, ids) = runner.join().unwrap();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(stats.rejected, 1);
    assert!(fx.ring.buffers().iter().all(|b| b.is_clean()));
}

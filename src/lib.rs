// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory event transport.
// Producer threads place fixed-size event records into a ring of buffers in
// a shared memory segment without ever blocking on the consumer; the
// consumer process drains full buffers in sequence order.

pub mod naming;

mod platform;

mod backoff;
pub use backoff::Backoff;

mod shm;
pub use shm::{HeapSegment, Segment, ShmSegment};

mod semaphore;
pub use semaphore::IpcSemaphore;

mod signal;
pub use signal::{LocalSignals, NamedSignals, Signal, SignalProvider};

mod error;
pub use error::{Error, Result, SequenceError};

mod config;
pub use config::{ConfigError, StalePolicy, SyncDiscipline, TransportConfig};

mod header;
pub use header::{BufferHeader, HEADER_SIZE};

mod buffer;
pub use buffer::Buffer;

mod ring;
pub use ring::{segment_len, BufferRing, LayoutTags, RING_HEADER_SIZE};

mod record;
pub use record::{
    now_ns, DecodeError, EncodedRecord, Event, EventKind, RecordCodec, RecordEncoder,
    RecordReader, LARGEST_RECORD_SIZE,
};

pub mod port;
pub use port::{
    AttachPort, ExclusivePort, LockFreePort, PlacementPort, Port, SynchronizedPort,
};

mod producer;
pub use producer::{Producer, ProducerStats};

mod consumer;
pub use consumer::{
    Admission, DrainLoop, DrainStats, RecordSink, SequenceTracker, StopHandle,
};

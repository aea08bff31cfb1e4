// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Producer side of the shared-memory event transport.
//
// Usage:
//   evring_produce [config] [threads] [events_per_thread]
//
// Attaches to a ring created by evring_consume with the same [config] and
// emits enter/checkpoint/leave triples, then flushes. A synchronized port
// always runs a single thread.

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use evring::{
    now_ns, AttachPort, BufferRing, ExclusivePort, LockFreePort, PlacementPort, Producer,
    ProducerStats, SyncDiscipline, SynchronizedPort, TransportConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn emit_triples<P: PlacementPort>(producer: &Producer<P>, stream: u32, count: u64) {
    for i in 0..count {
        producer.emit_context_enter(now_ns(), stream, i);
        producer.emit_checkpoint(now_ns(), stream, i);
        producer.emit_context_leave(now_ns(), stream, i);
    }
}

fn run_threads<P: PlacementPort + Sync>(producer: Producer<P>, threads: u32, count: u64) -> ProducerStats {
    thread::scope(|s| {
        for stream in 0..threads {
            let producer = &producer;
            s.spawn(move || emit_triples(producer, stream, count));
        }
    });
    producer.flush();
    producer.stats()
}

fn run(config: &TransportConfig, threads: u32, count: u64) -> evring::Result<ProducerStats> {
    let ring = Arc::new(BufferRing::open_named(config)?);
    info!(discipline = %config.sync, threads, count, "producer attached");
    Ok(match config.sync {
        SyncDiscipline::Synchronized => {
            let producer = Producer::new(SynchronizedPort::attach(ring, config)?);
            emit_triples(&producer, 0, count);
            producer.flush();
            producer.stats()
        }
        SyncDiscipline::Exclusive => {
            run_threads(Producer::new(ExclusivePort::attach(ring, config)?), threads, count)
        }
        SyncDiscipline::LockFree => {
            run_threads(Producer::new(LockFreePort::attach(ring, config)?), threads, count)
        }
    })
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args: Vec<String> = std::env::args().collect();
    let config: TransportConfig = match args.get(1).map(String::as_str).unwrap_or("").parse() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("evring_produce: {e}");
            return ExitCode::FAILURE;
        }
    };
    let threads: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(4);
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    match run(&config, threads, count) {
        Ok(stats) => {
            println!("emitted {} events, dropped {}", stats.emitted, stats.dropped);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("evring_produce: {e} (is evring_consume running with the same config?)");
            ExitCode::FAILURE
        }
    }
}

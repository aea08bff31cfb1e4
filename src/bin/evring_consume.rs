// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Consumer side of the shared-memory event transport.
//
// Usage:
//   evring_consume [config]
//
// Creates the ring described by [config] (e.g. "name=demo,buffers=8") and
// drains it until SIGINT/SIGTERM, printing a line per drained batch.
// Log verbosity follows RUST_LOG.

use std::process::ExitCode;

use evring::{DrainLoop, Event, EventKind, RecordSink, TransportConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Printer {
    per_kind: [u64; 4],
    last_sequence: u64,
}

impl RecordSink for Printer {
    fn on_event(&mut self, sequence: u64, event: &Event) {
        let slot = match event.kind {
            EventKind::Checkpoint => 0,
            EventKind::ContextEnter => 1,
            EventKind::ContextLeave => 2,
            EventKind::ContextException => 3,
        };
        self.per_kind[slot] += 1;
        if sequence != self.last_sequence {
            self.last_sequence = sequence;
            println!(
                "seq {sequence}: checkpoint={} enter={} leave={} exception={}",
                self.per_kind[0], self.per_kind[1], self.per_kind[2], self.per_kind[3]
            );
        }
    }
}

fn main() -> ExitCode {
    init_logging();

    let arg = std::env::args().nth(1).unwrap_or_default();
    let config: TransportConfig = match arg.parse() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("evring_consume: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut drain = match DrainLoop::create(&config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("evring_consume: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(%config, "consumer ready");

    let stop = drain.stop_handle();
    ctrlc_or_sigterm(move || stop.stop());

    let mut printer = Printer::default();
    match drain.run(&mut printer) {
        Ok(stats) => {
            println!(
                "drained {} buffers, {} events ({} stale, {} gap, {} rejected, {} corrupt bytes)",
                stats.buffers,
                stats.events,
                stats.stale_skipped,
                stats.gap_skipped,
                stats.rejected,
                stats.corrupt_bytes
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("drain loop failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn ctrlc_or_sigterm(f: impl Fn() + Send + 'static) {
    #[cfg(unix)]
    {
        use std::sync::Mutex;
        static CB: std::sync::OnceLock<Mutex<Box<dyn Fn() + Send>>> = std::sync::OnceLock::new();
        CB.get_or_init(|| Mutex::new(Box::new(f)));
        extern "C" fn handler(_: libc::c_int) {
            if let Some(cb) = CB.get() {
                if let Ok(g) = cb.try_lock() {
                    g();
                }
            }
        }
        unsafe {
            libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = f;
    }
}

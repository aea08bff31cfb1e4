// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wake-up signals between producer and consumer.
//
// A signal is a counting semaphore: `post` raises it by one, `wait` and
// `try_wait` take one unit. The consumer creates every signal of a ring,
// producers open them by name.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::semaphore::IpcSemaphore;

pub trait Signal: Send + Sync {
    fn post(&self) -> io::Result<()>;

    /// Take one unit, blocking for at most `timeout_ms` (forever if `None`).
    /// `Ok(false)` on timeout.
    fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool>;

    fn try_wait(&self) -> io::Result<bool>;

    /// Lower the signal completely.
    fn reset(&self) -> io::Result<()> {
        while self.try_wait()? {}
        Ok(())
    }
}

/// Creates (consumer side) and opens (producer side) named signals.
pub trait SignalProvider: Send + Sync {
    fn create(&self, name: &str) -> io::Result<Arc<dyn Signal>>;
    fn open(&self, name: &str) -> io::Result<Arc<dyn Signal>>;
}

// ---------------------------------------------------------------------------
// NamedSignals: OS semaphores, usable across processes
// ---------------------------------------------------------------------------

struct NamedSignal {
    sem: IpcSemaphore,
    owner: bool,
}

impl Signal for NamedSignal {
    fn post(&self) -> io::Result<()> {
        self.sem.post(1)
    }

    fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.sem.wait(timeout_ms)
    }

    fn try_wait(&self) -> io::Result<bool> {
        self.sem.try_wait()
    }

    fn reset(&self) -> io::Result<()> {
        self.sem.reset().map(|_| ())
    }
}

impl Drop for NamedSignal {
    fn drop(&mut self) {
        if self.owner {
            IpcSemaphore::clear_storage(self.sem.name());
        }
    }
}

/// Signals backed by named OS semaphores.
///
/// `create` removes a leftover object of the same name first and the created
/// semaphore is unlinked again when its creator drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NamedSignals;

impl SignalProvider for NamedSignals {
    fn create(&self, name: &str) -> io::Result<Arc<dyn Signal>> {
        IpcSemaphore::clear_storage(name);
        let sem = IpcSemaphore::create(name, 0)?;
        Ok(Arc::new(NamedSignal { sem, owner: true }))
    }

    fn open(&self, name: &str) -> io::Result<Arc<dyn Signal>> {
        let sem = IpcSemaphore::open(name)?;
        Ok(Arc::new(NamedSignal { sem, owner: false }))
    }
}

// ---------------------------------------------------------------------------
// LocalSignals: in-process registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LocalSignal {
    count: Mutex<u32>,
    cond: Condvar,
}

impl LocalSignal {
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Signal for LocalSignal {
    fn post(&self) -> io::Result<()> {
        let mut count = self.lock();
        *count = count.saturating_add(1);
        self.cond.notify_one();
        Ok(())
    }

    fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        let count = self.lock();
        let mut count = match timeout_ms {
            None => self
                .cond
                .wait_while(count, |c| *c == 0)
                .unwrap_or_else(PoisonError::into_inner),
            Some(ms) => {
                let (guard, res) = self
                    .cond
                    .wait_timeout_while(count, Duration::from_millis(ms), |c| *c == 0)
                    .unwrap_or_else(PoisonError::into_inner);
                if res.timed_out() && *guard == 0 {
                    return Ok(false);
                }
                guard
            }
        };
        *count -= 1;
        Ok(true)
    }

    fn try_wait(&self) -> io::Result<bool> {
        let mut count = self.lock();
        if *count == 0 {
            return Ok(false);
        }
        *count -= 1;
        Ok(true)
    }

    fn reset(&self) -> io::Result<()> {
        *self.lock() = 0;
        Ok(())
    }
}

/// Signals living in a registry shared by clones of this value.
///
/// Lets a producer ring and a consumer ring over a
/// [`HeapSegment`](crate::HeapSegment) find each other inside one process.
#[derive(Clone, Default)]
pub struct LocalSignals {
    registry: Arc<Mutex<HashMap<String, Arc<LocalSignal>>>>,
}

impl LocalSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalProvider for LocalSignals {
    fn create(&self, name: &str) -> io::Result<Arc<dyn Signal>> {
        let signal = Arc::new(LocalSignal::default());
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), signal.clone());
        Ok(signal)
    }

    fn open(&self, name: &str) -> io::Result<Arc<dyn Signal>> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        match registry.get(name) {
            Some(signal) => Ok(signal.clone()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no local signal named {name}"),
            )),
        }
    }
}

impl std::fmt::Debug for LocalSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let n = self.registry.lock().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("LocalSignals").field("signals", &n).finish()
    }
}

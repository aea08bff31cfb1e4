// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named, inter-process counting semaphore.
// Delegates to platform::PlatformSemaphore (POSIX or Windows).

use std::io;

use crate::platform::PlatformSemaphore;

/// A named counting semaphore visible to every process on the host.
pub struct IpcSemaphore {
    inner: PlatformSemaphore,
}

impl IpcSemaphore {
    /// Create the semaphore with an initial count; fails if it exists.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        Ok(Self {
            inner: PlatformSemaphore::create(name, initial)?,
        })
    }

    /// Open an existing semaphore; fails if it does not exist.
    pub fn open(name: &str) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        Ok(Self {
            inner: PlatformSemaphore::open(name)?,
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Increment the count by `count`, waking up to that many waiters.
    pub fn post(&self, count: u32) -> io::Result<()> {
        self.inner.post(count)
    }

    /// Decrement, blocking for at most `timeout_ms` (forever if `None`).
    /// Returns `Ok(false)` on timeout.
    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait(timeout_ms)
    }

    /// Decrement without blocking. `Ok(false)` when the count is zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        self.inner.try_wait()
    }

    /// Drain the count to zero. Returns how many units were taken.
    pub fn reset(&self) -> io::Result<u32> {
        let mut n = 0;
        while self.inner.try_wait()? {
            n += 1;
        }
        Ok(n)
    }

    /// Remove the named object so the next `create` starts from scratch.
    pub fn clear_storage(name: &str) {
        PlatformSemaphore::unlink_by_name(name);
    }
}

impl std::fmt::Debug for IpcSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcSemaphore").field("name", &self.name()).finish()
    }
}

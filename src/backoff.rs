// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Adaptive backoff for spin-wait loops: busy spin → pause → yield → sleep.

/// Step counter driving the adaptive wait.
///
/// - step < 4:  busy spin (do nothing)
/// - step < 16: CPU pause hint
/// - step < 32: thread yield
/// - step >= 32: sleep 1ms ([`snooze`](Self::snooze) only)
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    /// Full adaptive wait, ending in 1ms sleeps once the step count is high.
    #[inline]
    pub fn snooze(&mut self) {
        if self.step < 4 {
            // busy spin
        } else if self.step < 16 {
            std::hint::spin_loop();
        } else if self.step < 32 {
            std::thread::yield_now();
        } else {
            std::thread::sleep(std::time::Duration::from_millis(1));
            return;
        }
        self.step += 1;
    }

    /// Like [`snooze`](Self::snooze) but never sleeps: the longest wait is a
    /// thread yield. Producer threads use this one.
    #[inline]
    pub fn spin(&mut self) {
        if self.step < 4 {
            // busy spin
        } else if self.step < 16 {
            std::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
        self.step = self.step.saturating_add(1);
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Monotonic time source used by the metrics tracers.
//!
//! Tracers read `Clock::now()` at construction and at terminal events; using a trait instead of
//! `std::time::Instant` directly lets the scenario tests in `tests/scenarios.rs` advance time
//! deterministically in millisecond steps, as SPEC_FULL's end-to-end scenarios require.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A monotonic time source.
pub trait Clock: Send + Sync + 'static {
    /// Opaque monotonic instant. Only differences between two `now()` calls are meaningful.
    fn now(&self) -> Instant;
}

/// The real wall-clock source, backed by `std::time::Instant`.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances when told to, for deterministic tests.
///
/// `Instant` cannot be constructed from an arbitrary offset, so `FakeClock` anchors itself to a
/// real `Instant` taken at construction and tracks an artificial offset on top of it; `now()`
/// then returns `anchor + offset`.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockState>>,
}

struct FakeClockState {
    anchor: Instant,
    offset: Duration,
}

impl FakeClock {
    pub fn new() -> Self {
        FakeClock {
            inner: Arc::new(Mutex::new(FakeClockState {
                anchor: Instant::now(),
                offset: Duration::ZERO,
            })),
        }
    }

    /// Advance the fake clock by the given number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Advance the fake clock by an arbitrary duration.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.offset += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.anchor + state.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_command() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        clock.advance_millis(170);
        let t1 = clock.now();
        assert_eq!(t1 - t0, Duration::from_millis(170));
    }

    #[test]
    fn fake_clock_shared_across_clones_observes_same_offset() {
        let clock = FakeClock::new();
        let clone = clock.clone();
        clock.advance_millis(30);
        assert_eq!(clock.now(), clone.now());
    }
}

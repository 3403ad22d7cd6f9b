//! Deterministic clock and RNG for reproducible replay.
//!
//! A [`SimClock`] hands out a strictly increasing, reproducible timestamp
//! sequence from a seed epoch and a fixed tick size. A [`SimRng`] is a pure
//! 32-bit xorshift generator. Two instances constructed with the same seed
//! and driven through the same call sequence produce identical output; that
//! property is what makes scenario replay byte-for-byte reproducible.
//!
//! Live mode uses [`FleetClock::Wall`] instead, with no determinism
//! guarantee.

use std::sync::atomic::{AtomicI64, Ordering};

/// Seedable simulated clock advancing by a fixed tick per `now_ms()` call.
#[derive(Debug)]
pub struct SimClock {
    cursor_ms: AtomicI64,
    tick_ms: i64,
}

impl SimClock {
    /// Create a clock starting at `seed_epoch_ms`, advancing `tick_ms` per call.
    #[must_use]
    pub fn new(seed_epoch_ms: i64, tick_ms: i64) -> Self {
        Self {
            cursor_ms: AtomicI64::new(seed_epoch_ms),
            tick_ms: tick_ms.max(1),
        }
    }

    /// Advance the cursor by one tick and return the new timestamp.
    ///
    /// Successive calls are strictly increasing.
    pub fn now_ms(&self) -> i64 {
        self.cursor_ms.fetch_add(self.tick_ms, Ordering::SeqCst) + self.tick_ms
    }

    /// Read the current cursor without advancing.
    #[must_use]
    pub fn peek_ms(&self) -> i64 {
        self.cursor_ms.load(Ordering::SeqCst)
    }

    /// Jump the cursor forward by an arbitrary delta (speed-factor fast-forward).
    pub fn advance_ms(&self, delta_ms: i64) {
        self.cursor_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Tick size in milliseconds.
    #[must_use]
    pub fn tick_ms(&self) -> i64 {
        self.tick_ms
    }
}

/// Pure 32-bit xorshift RNG (mix-and-shift).
///
/// Not cryptographic. The state transition is a pure function of the previous
/// state, which is exactly what replay reproducibility needs.
#[derive(Debug, Clone)]
pub struct SimRng {
    state: u32,
}

impl SimRng {
    /// xorshift32 has no zero state; remap seed 0 to a fixed odd constant.
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut s = self.state;
        s ^= s << 13;
        s ^= s >> 17;
        s ^= s << 5;
        self.state = s;
        s
    }

    /// Next float in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / (u64::from(u32::MAX) + 1) as f64
    }

    /// Next integer in `[lo, hi)`. Returns `lo` when the range is empty.
    pub fn next_u32_in(&mut self, lo: u32, hi: u32) -> u32 {
        if hi <= lo {
            return lo;
        }
        lo + self.next_u32() % (hi - lo)
    }

    /// Next float in `[lo, hi)`.
    pub fn next_f64_in(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.next_f64() * (hi - lo)
    }
}

/// Time source for the pipeline: deterministic in replay, wall clock in live.
#[derive(Debug)]
pub enum FleetClock {
    /// Seeded deterministic clock (replay mode).
    Sim(SimClock),
    /// Wall-clock time (live mode). No determinism guarantee.
    Wall,
}

impl FleetClock {
    #[must_use]
    pub fn wall() -> Self {
        Self::Wall
    }

    #[must_use]
    pub fn sim(seed_epoch_ms: i64, tick_ms: i64) -> Self {
        Self::Sim(SimClock::new(seed_epoch_ms, tick_ms))
    }

    /// Current time in epoch milliseconds.
    ///
    /// The simulated variant advances by one tick per call.
    pub fn now_ms(&self) -> i64 {
        match self {
            Self::Sim(clock) => clock.now_ms(),
            Self::Wall => wall_now_ms(),
        }
    }

    /// Read without advancing (wall clock reads are always non-advancing).
    pub fn peek_ms(&self) -> i64 {
        match self {
            Self::Sim(clock) => clock.peek_ms(),
            Self::Wall => wall_now_ms(),
        }
    }
}

/// Epoch milliseconds from the system clock.
#[must_use]
pub fn wall_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

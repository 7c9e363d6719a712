//! Fixed-step tick gate.
//!
//! Converts variable frame time into simulation ticks of a fixed duration.
//! Every role (owner, authority, observer) runs one of these per entity.
//!
//! At most one tick fires per `advance` call, and firing consumes exactly one
//! tick duration from the remainder. After a long stall the remainder is
//! drained one tick per frame over the following frames instead of firing a
//! burst; catching up is not attempted.

use serde::{Deserialize, Serialize};

use crate::config::MovementConfig;

/// Simulation tick number in `[0, capacity)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Tick(pub u32);

impl Tick {
    /// The tick after this one, wrapping to zero at `capacity`.
    pub fn next(self, capacity: u32) -> Tick {
        let n = self.0 + 1;
        if n >= capacity {
            Tick(0)
        } else {
            Tick(n)
        }
    }

    /// Ring slot this tick maps to.
    pub fn slot(self, capacity: u32) -> usize {
        (self.0 % capacity) as usize
    }
}

/// Accumulates frame time and fires fixed-duration ticks.
#[derive(Debug, Clone)]
pub struct FixedStepAccumulator {
    tick_duration: f32,
    remainder: f32,
    tick: Tick,
    capacity: u32,
}

impl FixedStepAccumulator {
    /// Creates an accumulator firing every `tick_duration` seconds whose
    /// counter wraps at `capacity`.
    ///
    /// `capacity` must be the same constant the entity's history ring uses,
    /// or counter and slot index drift apart after the first wrap.
    pub fn new(tick_duration: f32, capacity: u32) -> Self {
        Self {
            tick_duration,
            remainder: 0.0,
            tick: Tick(0),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(cfg: &MovementConfig) -> Self {
        Self::new(cfg.tick_duration(), cfg.history_capacity)
    }

    /// Feeds one frame's delta time.
    ///
    /// Returns the tick that fired, if the accumulated time strictly exceeds
    /// one tick duration. The internal counter then moves to the next tick.
    pub fn advance(&mut self, frame_dt: f32) -> Option<Tick> {
        if frame_dt.is_finite() && frame_dt > 0.0 {
            self.remainder += frame_dt;
        }
        if self.remainder > self.tick_duration {
            let fired = self.tick;
            self.remainder -= self.tick_duration;
            self.tick = self.tick.next(self.capacity);
            Some(fired)
        } else {
            None
        }
    }

    /// Tick that will fire next.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Unconsumed frame time in seconds.
    pub fn remainder(&self) -> f32 {
        self.remainder
    }

    pub fn tick_duration(&self) -> f32 {
        self.tick_duration
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

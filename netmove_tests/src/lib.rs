//! Helpers shared by the integration tests.

use std::sync::Arc;

use netmove_shared::{
    config::MovementConfig,
    session::{ChannelDispatch, MoveReceiver, SessionContext, TransportRole},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Client-side context whose dispatched requests land in the returned receiver.
pub fn client_context(cfg: MovementConfig) -> (SessionContext, MoveReceiver) {
    let (dispatch, rx) = ChannelDispatch::new();
    (
        SessionContext::new(TransportRole::Client, cfg, Arc::new(dispatch)),
        rx,
    )
}

/// Frame time that makes a fresh gate fire on every call.
///
/// Each call adds one and a half ticks and consumes one, so the remainder
/// only grows and never drops below the threshold.
pub fn ticking_frame(cfg: &MovementConfig) -> f32 {
    cfg.tick_duration() * 1.5
}

/// Deterministic pseudo-random frame times in `[0, 3 * tick)`.
pub struct FrameJitter {
    rng: StdRng,
    tick: f32,
}

impl FrameJitter {
    pub fn new(seed: u64, cfg: &MovementConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            tick: cfg.tick_duration(),
        }
    }

    pub fn next_dt(&mut self) -> f32 {
        self.rng.gen_range(0.0..3.0 * self.tick)
    }
}

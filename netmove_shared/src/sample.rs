//! Per-tick input and motion records.

use serde::{Deserialize, Serialize};

use crate::{
    entity::Transform,
    math::{Quat, Vec2, Vec3},
    tick::Tick,
};

/// Intent captured on the owning role for one tick. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSample {
    pub tick: Tick,
    /// Planar move axes: `x` strafes, `y` goes forward.
    pub move_input: Vec2,
    /// Look delta; only `x` (yaw) is consumed by the kernel.
    pub look_delta: Vec2,
}

impl InputSample {
    pub fn new(tick: Tick, move_input: Vec2, look_delta: Vec2) -> Self {
        Self {
            tick,
            move_input,
            look_delta,
        }
    }

    /// False only when there is no planar intent and no yaw at all.
    pub fn is_moving(&self) -> bool {
        !(self.move_input.length() == 0.0 && self.look_delta.x == 0.0)
    }
}

/// Transform produced by the movement kernel for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionState {
    pub tick: Tick,
    pub position: Vec3,
    pub rotation: Quat,
    pub is_moving: bool,
}

impl MotionState {
    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.rotation)
    }

    /// Snapshot of `transform` tagged with the sample's tick.
    pub fn after(sample: &InputSample, transform: Transform) -> Self {
        Self {
            tick: sample.tick,
            position: transform.position,
            rotation: transform.rotation,
            is_moving: sample.is_moving(),
        }
    }
}

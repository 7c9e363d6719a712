//! Movement kernel.
//!
//! The single deterministic step shared by the predicting owner and the
//! authority. Both sides call it with the same sample and the fixed tick
//! duration; any prediction error comes from the two calls seeing different
//! transforms or `dt`, and is not corrected here.

use crate::{
    config::MovementConfig,
    entity::Transform,
    math::{Quat, Vec3},
    sample::{InputSample, MotionState},
};

/// Speeds applied by the kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementKernel {
    /// Units per second.
    pub move_speed: f32,
    /// Degrees of yaw per second per unit of look delta.
    pub rotation_speed: f32,
}

impl MovementKernel {
    pub fn new(move_speed: f32, rotation_speed: f32) -> Self {
        Self {
            move_speed,
            rotation_speed,
        }
    }

    pub fn from_config(cfg: &MovementConfig) -> Self {
        Self::new(cfg.move_speed, cfg.rotation_speed)
    }

    /// Advances a transform by one sample.
    ///
    /// The planar move `(x, 0, y)` is normalized, scaled by `move_speed * dt`
    /// and turned into world space by the *current* facing, then added to the
    /// position. The yaw delta `look.x * rotation_speed * dt` is composed on
    /// top of the current rotation afterwards.
    pub fn step(
        &self,
        position: Vec3,
        rotation: Quat,
        input: &InputSample,
        dt: f32,
    ) -> (Vec3, Quat) {
        let local = Vec3::new(input.move_input.x, 0.0, input.move_input.y)
            .normalize_or_zero()
            * (self.move_speed * dt);
        let new_position = position + rotation.rotate(local);

        let yaw = input.look_delta.x * self.rotation_speed * dt;
        let new_rotation = (rotation * Quat::from_yaw_degrees(yaw)).normalize();

        (new_position, new_rotation)
    }

    /// Steps `transform` in place and returns the resulting tagged state.
    pub fn advance(&self, transform: &mut Transform, input: &InputSample, dt: f32) -> MotionState {
        let (position, rotation) = self.step(transform.position, transform.rotation, input, dt);
        *transform = Transform::new(position, rotation);
        MotionState::after(input, *transform)
    }
}

//! Input handling.
//!
//! In a real client this would integrate with windowing, raw mouse/keyboard
//! and action bindings. Here raw axes are clamped into the ranges the
//! movement kernel expects; the controller turns them into per-tick
//! `InputSample`s.

use netmove_shared::math::Vec2;

/// Raw axes sampled for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    /// Strafe axis, `[-1, 1]`.
    pub horizontal: f32,
    /// Forward axis, `[-1, 1]`.
    pub vertical: f32,
    /// Mouse X delta (yaw).
    pub look_x: f32,
    /// Mouse Y delta; carried on the wire, not consumed by the kernel.
    pub look_y: f32,
}

impl InputState {
    pub fn move_vector(self) -> Vec2 {
        Vec2::new(clamp_axis(self.horizontal), clamp_axis(self.vertical))
    }

    pub fn look_vector(self) -> Vec2 {
        Vec2::new(finite_or_zero(self.look_x), finite_or_zero(self.look_y))
    }
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn clamp_axis(v: f32) -> f32 {
    finite_or_zero(v).clamp(-1.0, 1.0)
}

/// Deterministic input source for headless clients: walks forward while
/// turning, pausing every few seconds so observers see stop/start edges.
#[derive(Debug, Clone)]
pub struct InputScript {
    elapsed: f32,
    walk_secs: f32,
    pause_secs: f32,
    turn: f32,
}

impl Default for InputScript {
    fn default() -> Self {
        Self::new(3.0, 1.0, 0.2)
    }
}

impl InputScript {
    pub fn new(walk_secs: f32, pause_secs: f32, turn: f32) -> Self {
        Self {
            elapsed: 0.0,
            walk_secs,
            pause_secs,
            turn,
        }
    }

    /// Advances the script by `dt` and returns the input for this frame.
    pub fn sample(&mut self, dt: f32) -> InputState {
        self.elapsed += dt;
        let period = self.walk_secs + self.pause_secs;
        let phase = if period > 0.0 {
            self.elapsed % period
        } else {
            0.0
        };
        if phase < self.walk_secs {
            InputState {
                vertical: 1.0,
                look_x: self.turn,
                ..Default::default()
            }
        } else {
            InputState::default()
        }
    }
}

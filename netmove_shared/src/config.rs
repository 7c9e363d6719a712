//! Configuration system.
//!
//! Loads movement configuration from JSON strings/files. Every role in a
//! session must run with the same tick rate, capacity and speeds, otherwise
//! the owner's prediction and the authority's result diverge.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default ring capacity; also the modulus the tick counter wraps at.
pub const DEFAULT_HISTORY_CAPACITY: u32 = 1024;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Authority listen address, e.g. `127.0.0.1:40100`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// History ring capacity and tick wrap modulus.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: u32,
    /// Planar speed in units per second.
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    /// Yaw speed in degrees per second per unit of look delta.
    #[serde(default = "default_rotation_speed")]
    pub rotation_speed: f32,
    /// Player limit requested when creating a session.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Replicate yaw as a quantized `i16` instead of a full quaternion.
    #[serde(default)]
    pub compact_rotation: bool,
}

fn default_server_addr() -> String {
    "127.0.0.1:40100".to_string()
}

fn default_tick_hz() -> u32 {
    60
}

fn default_history_capacity() -> u32 {
    DEFAULT_HISTORY_CAPACITY
}

fn default_move_speed() -> f32 {
    20.0
}

fn default_rotation_speed() -> f32 {
    500.0
}

fn default_max_players() -> u32 {
    5
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            history_capacity: default_history_capacity(),
            move_speed: default_move_speed(),
            rotation_speed: default_rotation_speed(),
            max_players: default_max_players(),
            compact_rotation: false,
        }
    }
}

impl MovementConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fixed tick duration in seconds.
    pub fn tick_duration(&self) -> f32 {
        1.0 / self.tick_hz as f32
    }

    /// Rejects values the movement core cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.tick_hz > 0, "tick_hz must be positive");
        anyhow::ensure!(
            self.history_capacity > 0,
            "history_capacity must be positive"
        );
        anyhow::ensure!(
            self.history_capacity <= i32::MAX as u32,
            "history_capacity must fit the i32 wire tick"
        );
        anyhow::ensure!(
            self.move_speed.is_finite() && self.move_speed >= 0.0,
            "move_speed must be finite and non-negative"
        );
        anyhow::ensure!(
            self.rotation_speed.is_finite() && self.rotation_speed >= 0.0,
            "rotation_speed must be finite and non-negative"
        );
        Ok(())
    }
}

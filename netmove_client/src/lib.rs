//! `netmove_client`
//!
//! Client-side systems:
//! - Joining the authority over an unreliable channel
//! - Input sampling
//! - Local prediction for the owned entity
//! - Observer controllers snapping remote entities to replicated state

pub mod client;
pub mod input;

pub use client::MovementClient;

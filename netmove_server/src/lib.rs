//! `netmove_server`
//!
//! Authority-side systems:
//! - One `Authority` movement controller per joined player
//! - Receives tick-tagged `MoveRequest`s
//! - Replicates every `MotionState` change to all peers
//! - Optional host avatar driven by local input
//!
//! Networking model:
//! - UDP only; joins are retried by the client, requests and states may be
//!   lost or reordered and carry their tick.

pub mod server;

pub use server::MovementServer;

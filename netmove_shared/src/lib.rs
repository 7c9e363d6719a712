//! `netmove_shared`
//!
//! Movement core shared by every role.
//!
//! Design goals:
//! - Deterministic: the kernel run by the predicting owner and by the
//!   authority is the same pure function.
//! - Tick-gated: all simulation happens in fixed steps whose counter wraps at
//!   the history ring capacity.
//! - Explicit context: controllers receive a `SessionContext` instead of
//!   reaching for process-wide network state.
//! - No `unsafe`.

pub mod config;
pub mod controller;
pub mod entity;
pub mod history;
pub mod kernel;
pub mod math;
pub mod net;
pub mod quantize;
pub mod replicator;
pub mod sample;
pub mod session;
pub mod tick;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::controller::*;
    pub use crate::entity::*;
    pub use crate::math::*;
    pub use crate::sample::*;
    pub use crate::tick::*;
}

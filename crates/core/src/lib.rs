//! Domain model for the keelson build engine.
//!
//! Everything in this crate is pure data and pure functions: projects, builds,
//! step results, hooks, step-text parsing and the stability estimate. Storage,
//! process execution and scheduling live in the `db`, `vcs` and `orchestrator`
//! crates.

pub mod domain;
pub mod error;
pub mod format;
pub mod stability;
pub mod steps;

pub use domain::*;
pub use error::{CoreError, ValidationError};
pub use format::format_duration;
pub use stability::{Stability, STABILITY_WINDOW};
pub use steps::{parse_steps, COMMENT_MARKER};

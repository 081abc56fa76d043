//! Event system for keelson
//!
//! This crate provides the event bus and event types that carry project and
//! build lifecycle changes to whoever is listening (hook delivery, the CLI).

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;

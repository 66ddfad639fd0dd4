//! zlog-push library crate.
//!
//! Relays chat log events into a processing queue, matches them against
//! per-recipient hotword rules and records the resulting notifications.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod health;
pub mod logging;
pub mod pipeline;
pub mod services;

pub use error::{Error, Result, WriteOutcome};

//! Repository layer for database access.
//!
//! Every table is reached through a trait so the relay and drain loop can be
//! exercised against mocks as well as SQLite.

pub mod cursor;
pub mod delivery;
pub mod log;
pub mod pm;
pub mod queue;
pub mod user;

pub use cursor::*;
pub use delivery::*;
pub use log::*;
pub use pm::*;
pub use queue::*;
pub use user::*;

//! Database models.

pub mod delivery;
pub mod event;
pub mod pm;
pub mod user;

pub use delivery::*;
pub use event::*;
pub use pm::*;
pub use user::*;

//! Domain layer.

pub mod rule;

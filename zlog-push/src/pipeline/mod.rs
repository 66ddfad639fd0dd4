//! Relay and drain stages of the notification pipeline.

pub mod dedup;
pub mod drain;
pub mod relay;

pub use dedup::PmDedupIndex;
pub use drain::{DrainConfig, DrainContext, DrainProgress, DrainSnapshot, QueueDrainer};
pub use relay::{LogRelay, RelayConfig};

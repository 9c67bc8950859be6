//! Repository layer for database access.

pub mod accounting;
pub mod sending_ip;
pub mod snapshot;
pub mod warmup_log;

pub use accounting::*;
pub use sending_ip::*;
pub use snapshot::*;
pub use warmup_log::*;

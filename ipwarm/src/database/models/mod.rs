//! Database row models.
//!
//! Rows map directly to the schema; JSON columns are decoded through helper
//! methods rather than stored as typed fields.

pub mod accounting_cursor;
pub mod sending_ip;
pub mod snapshot;
pub mod warmup_log;

pub use accounting_cursor::*;
pub use sending_ip::*;
pub use snapshot::*;
pub use warmup_log::*;

//! Client for the PowerMTA HTTP management API.
//!
//! Only the fields the warmup engine consumes are modeled: version, uptime, queue
//! totals, and delivered/bounced/queued counters per VMTA and per domain. Unknown
//! XML elements are ignored.

pub mod client;
pub mod error;
pub mod model;

pub use client::{DEFAULT_TIMEOUT, PmtaClient, PmtaClientConfig};
pub use error::{PmtaApiError, Result};
pub use model::{DomainQueueStatus, MtaStatus, QueueSummary, VmtaStatus};

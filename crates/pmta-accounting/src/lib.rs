//! pmta-accounting: PowerMTA accounting log parsing and health aggregation.
//!
//! ## Core Types
//!
//! - [`AccountingRecord`] - A single delivery, bounce or feedback-loop event
//! - [`RecordType`] - Accounting record classification (`d`, `b`, `rb`, `f`)
//! - [`AccountingParser`] - Stateful line parser that remembers the header strategy
//! - [`ParserStrategy`] - Positional or header-driven column lookup
//!
//! ## Aggregation
//!
//! - [`aggregate_by_ip`] - Fold records into per-source-IP [`IpHealth`]
//! - [`aggregate_by_domain`] - Fold records into per-recipient-domain [`DomainStatus`]

pub mod aggregator;
pub mod error;
pub mod parser;
pub mod record;

pub use aggregator::{
    DomainStatus, HealthStatus, IpHealth, UNKNOWN_SOURCE_IP, aggregate_by_domain,
    aggregate_by_ip, classify_health,
};
pub use error::{AccountingError, PartialParse, Result};
pub use parser::{AccountingParser, ParserStrategy, parse_file, parse_reader};
pub use record::{AccountingRecord, RecordType};

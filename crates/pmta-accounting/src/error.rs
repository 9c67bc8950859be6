//! Accounting error types.

use thiserror::Error;

use crate::record::AccountingRecord;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, AccountingError>;

/// Errors that can occur while reading an accounting file.
#[derive(Error, Debug)]
pub enum AccountingError {
    /// The underlying reader failed part-way through.
    #[error(transparent)]
    Partial(#[from] PartialParse),

    /// The file could not be opened at all.
    #[error("Failed to open accounting file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AccountingError {
    /// Create an open error.
    pub fn open(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// Records collected before the failure, if any.
    pub fn into_partial_records(self) -> Vec<AccountingRecord> {
        match self {
            Self::Partial(partial) => partial.records,
            Self::Open { .. } => Vec::new(),
        }
    }
}

/// An I/O failure on the accounting stream.
///
/// Carries every record parsed before the failure so callers can still use them.
#[derive(Error, Debug)]
#[error("I/O error after {} parsed records: {source}", records.len())]
pub struct PartialParse {
    pub records: Vec<AccountingRecord>,
    #[source]
    pub source: std::io::Error,
}

//! Accounting cursor database model.

use pmta_accounting::ParserStrategy;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::utils::json::{self, JsonContext};

/// How far an accounting file has been folded into the counters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccountingCursorDbModel {
    pub path: String,
    /// Bytes consumed, always at a line boundary.
    pub byte_offset: i64,
    /// JSON-encoded [`ParserStrategy`]; empty means positional.
    pub strategy: String,
    /// Unix epoch milliseconds (UTC).
    pub updated_at: i64,
}

impl AccountingCursorDbModel {
    pub fn offset(&self) -> u64 {
        u64::try_from(self.byte_offset).unwrap_or(0)
    }

    /// Decoded `strategy`. Malformed JSON is logged and read as positional.
    pub fn strategy(&self) -> ParserStrategy {
        json::parse_or_default(
            &self.strategy,
            JsonContext::Cursor { path: &self.path },
            "Failed to parse accounting cursor strategy",
        )
    }
}

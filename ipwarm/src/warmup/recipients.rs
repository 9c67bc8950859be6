//! Recipient selection for warming IPs.
//!
//! Early days only mail the highest-quality subscribers; the bar drops as the
//! IP builds reputation. Each tier is a fixed query text; thresholds and limits
//! are bound as parameters.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::Result;

/// `data_source` value that qualifies a subscriber for the seed tier regardless of score.
pub const SEED_DATA_SOURCE: &str = "jvc-warmup";

/// Minimum `data_quality_score` per tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecipientThresholds {
    /// Days 1-7.
    pub seed: f64,
    /// Days 8-14.
    pub validate: f64,
    /// Days 15-22.
    pub expand: f64,
}

impl Default for RecipientThresholds {
    fn default() -> Self {
        Self {
            seed: 0.75,
            validate: 0.50,
            expand: 0.25,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct WarmupRecipient {
    pub id: String,
    pub email: String,
    pub data_quality_score: f64,
}

/// Recipient tier for a warmup day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientTier {
    Seed,
    Validate,
    Expand,
    All,
}

impl RecipientTier {
    pub fn for_day(day: i64) -> Self {
        match day {
            d if d <= 7 => Self::Seed,
            d if d <= 14 => Self::Validate,
            d if d <= 22 => Self::Expand,
            _ => Self::All,
        }
    }

    fn query(&self) -> &'static str {
        match self {
            Self::Seed => {
                "SELECT id, email, data_quality_score FROM subscribers \
                 WHERE status = 'confirmed' AND (data_quality_score >= ? OR data_source = ?) \
                 ORDER BY data_quality_score DESC LIMIT ?"
            }
            Self::Validate | Self::Expand => {
                "SELECT id, email, data_quality_score FROM subscribers \
                 WHERE status = 'confirmed' AND data_quality_score >= ? \
                 ORDER BY data_quality_score DESC LIMIT ?"
            }
            Self::All => {
                "SELECT id, email, data_quality_score FROM subscribers \
                 WHERE status = 'confirmed' \
                 ORDER BY data_quality_score DESC LIMIT ?"
            }
        }
    }
}

/// Eligible recipients for `warmup_day`, best first, at most `limit`.
pub async fn select_warmup_recipients(
    pool: &SqlitePool,
    thresholds: &RecipientThresholds,
    warmup_day: i64,
    limit: i64,
) -> Result<Vec<WarmupRecipient>> {
    let tier = RecipientTier::for_day(warmup_day);
    let query = sqlx::query_as::<_, WarmupRecipient>(tier.query());

    let query = match tier {
        RecipientTier::Seed => query.bind(thresholds.seed).bind(SEED_DATA_SOURCE),
        RecipientTier::Validate => query.bind(thresholds.validate),
        RecipientTier::Expand => query.bind(thresholds.expand),
        RecipientTier::All => query,
    };

    let recipients = query.bind(limit.max(0)).fetch_all(pool).await?;
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_for_day() {
        assert_eq!(RecipientTier::for_day(1), RecipientTier::Seed);
        assert_eq!(RecipientTier::for_day(7), RecipientTier::Seed);
        assert_eq!(RecipientTier::for_day(8), RecipientTier::Validate);
        assert_eq!(RecipientTier::for_day(14), RecipientTier::Validate);
        assert_eq!(RecipientTier::for_day(15), RecipientTier::Expand);
        assert_eq!(RecipientTier::for_day(22), RecipientTier::Expand);
        assert_eq!(RecipientTier::for_day(23), RecipientTier::All);
    }

    #[test]
    fn test_query_placeholders_match_binds() {
        let count = |tier: RecipientTier| tier.query().matches('?').count();
        assert_eq!(count(RecipientTier::Seed), 3);
        assert_eq!(count(RecipientTier::Validate), 2);
        assert_eq!(count(RecipientTier::Expand), 2);
        assert_eq!(count(RecipientTier::All), 1);
    }
}

//! Warmup volume schedule and stage buckets.

use serde::{Deserialize, Serialize};

/// Number of days in the warmup ramp.
pub const WARMUP_DAYS: i64 = 30;

/// Daily cap once an IP is past the ramp.
pub const ESTABLISHED_DAILY_LIMIT: i64 = 50_000;

/// Daily volume cap for warmup days 1..=30 (index 0 is day 1).
const WARMUP_SCHEDULE: [i64; WARMUP_DAYS as usize] = [
    50, 50, // 1-2
    100, 100, // 3-4
    250, 250, 250, // 5-7
    500, 500, 500, // 8-10
    1_000, 1_000, 1_000, 1_000, // 11-14
    2_500, 2_500, 2_500, 2_500, // 15-18
    5_000, 5_000, 5_000, 5_000, // 19-22
    10_000, 10_000, 10_000, 10_000, // 23-26
    25_000, 25_000, 25_000, 25_000, // 27-30
];

/// Daily send cap for a warmup day. Days below 1 clamp to day 1.
pub fn volume_for_day(day: i64) -> i64 {
    if day > WARMUP_DAYS {
        return ESTABLISHED_DAILY_LIMIT;
    }
    let index = (day.max(1) - 1) as usize;
    WARMUP_SCHEDULE[index]
}

/// Coarse ramp phase derived from the warmup day.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WarmupStage {
    #[strum(serialize = "day1")]
    #[serde(rename = "day1")]
    Day1,
    Early,
    Building,
    Ramping,
    Maturing,
    Established,
}

impl WarmupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day1 => "day1",
            Self::Early => "early",
            Self::Building => "building",
            Self::Ramping => "ramping",
            Self::Maturing => "maturing",
            Self::Established => "established",
        }
    }
}

pub fn stage_for_day(day: i64) -> WarmupStage {
    match day {
        d if d <= 2 => WarmupStage::Day1,
        d if d <= 7 => WarmupStage::Early,
        d if d <= 14 => WarmupStage::Building,
        d if d <= 22 => WarmupStage::Ramping,
        d if d <= WARMUP_DAYS => WarmupStage::Maturing,
        _ => WarmupStage::Established,
    }
}

/// Warmup day an IP should be on after `elapsed_hours` since it started,
/// clamped to the ramp.
pub fn expected_day(elapsed_hours: i64) -> i64 {
    (elapsed_hours.max(0) / 24 + 1).clamp(1, WARMUP_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_volume_for_day_table() {
        let expected = [
            (1, 50),
            (2, 50),
            (3, 100),
            (4, 100),
            (5, 250),
            (7, 250),
            (8, 500),
            (10, 500),
            (11, 1_000),
            (14, 1_000),
            (15, 2_500),
            (18, 2_500),
            (19, 5_000),
            (22, 5_000),
            (23, 10_000),
            (26, 10_000),
            (27, 25_000),
            (30, 25_000),
        ];
        for (day, volume) in expected {
            assert_eq!(volume_for_day(day), volume, "day {day}");
        }
    }

    #[test]
    fn test_volume_for_day_out_of_range() {
        assert_eq!(volume_for_day(0), 50);
        assert_eq!(volume_for_day(-5), 50);
        assert_eq!(volume_for_day(31), 50_000);
        assert_eq!(volume_for_day(365), 50_000);
    }

    #[test]
    fn test_stage_boundaries() {
        assert_eq!(stage_for_day(1), WarmupStage::Day1);
        assert_eq!(stage_for_day(2), WarmupStage::Day1);
        assert_eq!(stage_for_day(3), WarmupStage::Early);
        assert_eq!(stage_for_day(7), WarmupStage::Early);
        assert_eq!(stage_for_day(8), WarmupStage::Building);
        assert_eq!(stage_for_day(14), WarmupStage::Building);
        assert_eq!(stage_for_day(15), WarmupStage::Ramping);
        assert_eq!(stage_for_day(22), WarmupStage::Ramping);
        assert_eq!(stage_for_day(23), WarmupStage::Maturing);
        assert_eq!(stage_for_day(30), WarmupStage::Maturing);
        assert_eq!(stage_for_day(31), WarmupStage::Established);
    }

    #[test]
    fn test_stage_strings() {
        assert_eq!(WarmupStage::Day1.as_str(), "day1");
        assert_eq!(WarmupStage::Day1.to_string(), "day1");
        assert_eq!(WarmupStage::from_str("ramping").unwrap(), WarmupStage::Ramping);
        assert_eq!(
            serde_json::to_string(&WarmupStage::Established).unwrap(),
            "\"established\""
        );
    }

    #[test]
    fn test_expected_day() {
        assert_eq!(expected_day(0), 1);
        assert_eq!(expected_day(23), 1);
        assert_eq!(expected_day(24), 2);
        assert_eq!(expected_day(24 * 40), 30);
        assert_eq!(expected_day(-10), 1);
    }
}

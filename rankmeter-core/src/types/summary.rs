use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ScheduleId;

/// Coarse ranking tier derived from a numeric result position.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionBucket {
    Top3,
    Top10,
    Top20,
    None,
}

impl PositionBucket {
    pub fn for_position(position: Option<u32>) -> Self {
        match position {
            Some(1..=3) => PositionBucket::Top3,
            Some(4..=10) => PositionBucket::Top10,
            Some(11..=20) => PositionBucket::Top20,
            _ => PositionBucket::None,
        }
    }
}

/// One row per (schedule, day).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub schedule_id: ScheduleId,
    pub day: NaiveDate,
    pub total_items: i64,
    pub top3: i64,
    pub top10: i64,
    pub top20: i64,
    pub none: i64,
    pub average_position: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Signed deltas between the latest and previous summaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub latest_day: NaiveDate,
    pub previous_day: NaiveDate,
    pub top3: i64,
    pub top10: i64,
    pub top20: i64,
    pub none: i64,
    pub average_position: Option<f64>,
}

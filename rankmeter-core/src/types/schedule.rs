use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::check::{CheckKind, CheckOptions};
use super::ids::{AccountId, ScheduleId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            _ => None,
        }
    }
}

/// Recurrence rule. Only the day field matching `frequency` is populated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: Option<u8>,
    pub day_of_month: Option<u8>,
    pub hour_utc: u8,
}

impl Recurrence {
    pub fn daily(hour_utc: u8) -> Self {
        Self {
            frequency: Frequency::Daily,
            day_of_week: None,
            day_of_month: None,
            hour_utc,
        }
    }

    pub fn weekly(day_of_week: u8, hour_utc: u8) -> Self {
        Self {
            frequency: Frequency::Weekly,
            day_of_week: Some(day_of_week),
            day_of_month: None,
            hour_utc,
        }
    }

    pub fn monthly(day_of_month: u8, hour_utc: u8) -> Self {
        Self {
            frequency: Frequency::Monthly,
            day_of_week: None,
            day_of_month: Some(day_of_month),
            hour_utc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub id: ScheduleId,
    pub account_id: AccountId,
    pub check_kind: CheckKind,
    pub options: CheckOptions,
    #[serde(flatten)]
    pub recurrence: Recurrence,
    pub enabled: bool,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub last_scheduled_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted by a schedule update. Raw integers are validated before use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub frequency: String,
    #[serde(default)]
    pub day_of_week: Option<i32>,
    #[serde(default)]
    pub day_of_month: Option<i32>,
    pub hour_utc: i32,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Creation payload; the schedule starts enabled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub account_id: AccountId,
    pub check_kind: CheckKind,
    #[serde(default)]
    pub options: CheckOptions,
    #[serde(flatten)]
    pub update: ScheduleUpdate,
}

//! Pure slot arithmetic for recurring schedules.
//!
//! Every function here is deterministic: the same recurrence and the same
//! reference instant always produce the same slot, and the slot is always
//! strictly after the reference instant.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::error::{MeterError, Result};
use crate::types::{Frequency, Recurrence};

/// Check the day fields agree with the frequency and every value is in range.
pub fn validate_recurrence(recurrence: &Recurrence) -> Result<()> {
    if recurrence.hour_utc > 23 {
        return Err(MeterError::InvalidSchedule(format!(
            "hour_utc must be within 0-23, got {}",
            recurrence.hour_utc
        )));
    }

    match recurrence.frequency {
        Frequency::Daily => {
            if recurrence.day_of_week.is_some() || recurrence.day_of_month.is_some() {
                return Err(MeterError::InvalidSchedule(
                    "daily schedules take neither day_of_week nor day_of_month".to_string(),
                ));
            }
        }
        Frequency::Weekly => {
            if recurrence.day_of_month.is_some() {
                return Err(MeterError::InvalidSchedule(
                    "weekly schedules do not take day_of_month".to_string(),
                ));
            }
            match recurrence.day_of_week {
                Some(day) if day <= 6 => {}
                Some(day) => {
                    return Err(MeterError::InvalidSchedule(format!(
                        "day_of_week must be within 0-6, got {day}"
                    )));
                }
                None => {
                    return Err(MeterError::InvalidSchedule(
                        "weekly schedules require day_of_week".to_string(),
                    ));
                }
            }
        }
        Frequency::Monthly => {
            if recurrence.day_of_week.is_some() {
                return Err(MeterError::InvalidSchedule(
                    "monthly schedules do not take day_of_week".to_string(),
                ));
            }
            match recurrence.day_of_month {
                Some(day) if (1..=28).contains(&day) => {}
                Some(day) => {
                    return Err(MeterError::InvalidSchedule(format!(
                        "day_of_month must be within 1-28, got {day}"
                    )));
                }
                None => {
                    return Err(MeterError::InvalidSchedule(
                        "monthly schedules require day_of_month".to_string(),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn at_hour(date: NaiveDate, hour: u8) -> Result<DateTime<Utc>> {
    date.and_hms_opt(u32::from(hour), 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| MeterError::InvalidSchedule(format!("invalid hour {hour}")))
}

fn first_of_next_month(date: NaiveDate) -> Result<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| MeterError::InvalidSchedule(format!("date overflow after {date}")))
}

/// First slot of `recurrence` strictly after `now`.
///
/// Daily slots fall later today or tomorrow. Weekly slots fall 1 to 7 days
/// ahead, so the same weekday moves to next week. Monthly slots fall 1 to 31
/// days ahead, so the same day of month moves to next month.
pub fn compute_next_run(recurrence: &Recurrence, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    validate_recurrence(recurrence)?;
    let today = now.date_naive();
    let hour = recurrence.hour_utc;

    match recurrence.frequency {
        Frequency::Daily => {
            let candidate = at_hour(today, hour)?;
            if candidate > now {
                Ok(candidate)
            } else {
                at_hour(today + Duration::days(1), hour)
            }
        }
        Frequency::Weekly => {
            let target = i64::from(recurrence.day_of_week.unwrap_or_default());
            let current = i64::from(today.weekday().num_days_from_sunday());
            let mut ahead = (target - current).rem_euclid(7);
            if ahead == 0 {
                ahead = 7;
            }
            at_hour(today + Duration::days(ahead), hour)
        }
        Frequency::Monthly => {
            let day = u32::from(recurrence.day_of_month.unwrap_or(1));
            let date = if today.day() < day {
                today.with_day(day)
            } else {
                first_of_next_month(today)?.with_day(day)
            };
            let date = date.ok_or_else(|| {
                MeterError::InvalidSchedule(format!("day_of_month {day} does not exist"))
            })?;
            at_hour(date, hour)
        }
    }
}

/// Next slot after the slot that just fired.
///
/// The fired slot (`anchor`) is the reference, not the moment the run actually
/// started, so late invocations do not drift the schedule. Slots that already
/// passed while nothing was dispatching are skipped until one is after `now`.
pub fn next_after_run(
    recurrence: &Recurrence,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let mut next = compute_next_run(recurrence, anchor)?;
    while next <= now {
        next = compute_next_run(recurrence, next)?;
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn weekly_wednesday_from_monday_morning() {
        // 2026-10-12 is a Monday.
        let rule = Recurrence::weekly(3, 9);
        let next = compute_next_run(&rule, utc(2026, 10, 12, 10, 0)).unwrap();
        assert_eq!(next, utc(2026, 10, 14, 9, 0));
    }

    #[test]
    fn weekly_same_weekday_moves_a_full_week() {
        let rule = Recurrence::weekly(3, 9);
        let next = compute_next_run(&rule, utc(2026, 10, 14, 7, 30)).unwrap();
        assert_eq!(next, utc(2026, 10, 21, 9, 0));
    }

    #[test]
    fn daily_uses_today_until_hour_passes() {
        let rule = Recurrence::daily(6);
        assert_eq!(
            compute_next_run(&rule, utc(2026, 10, 16, 5, 59)).unwrap(),
            utc(2026, 10, 16, 6, 0)
        );
        assert_eq!(
            compute_next_run(&rule, utc(2026, 10, 16, 6, 0)).unwrap(),
            utc(2026, 10, 17, 6, 0)
        );
    }

    #[test]
    fn monthly_rolls_over_year_end() {
        let rule = Recurrence::monthly(15, 0);
        assert_eq!(
            compute_next_run(&rule, utc(2026, 12, 15, 0, 0)).unwrap(),
            utc(2027, 1, 15, 0, 0)
        );
        assert_eq!(
            compute_next_run(&rule, utc(2026, 12, 3, 22, 0)).unwrap(),
            utc(2026, 12, 15, 0, 0)
        );
    }

    #[test]
    fn computation_is_deterministic() {
        let rule = Recurrence::monthly(28, 23);
        let now = utc(2027, 2, 28, 23, 30);
        let first = compute_next_run(&rule, now).unwrap();
        let second = compute_next_run(&rule, now).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, utc(2027, 3, 28, 23, 0));
    }

    #[test]
    fn anchored_recompute_ignores_late_execution() {
        let rule = Recurrence::daily(9);
        let slot = utc(2026, 10, 16, 9, 0);
        let started_late = utc(2026, 10, 16, 9, 47);
        assert_eq!(
            next_after_run(&rule, slot, started_late).unwrap(),
            utc(2026, 10, 17, 9, 0)
        );
    }

    #[test]
    fn missed_slots_are_skipped_keeping_alignment() {
        let rule = Recurrence::weekly(1, 12);
        let slot = utc(2026, 9, 7, 12, 0);
        let now = utc(2026, 10, 16, 8, 0);
        assert_eq!(next_after_run(&rule, slot, now).unwrap(), utc(2026, 10, 19, 12, 0));
    }

    #[test]
    fn inconsistent_day_fields_are_rejected() {
        let mut rule = Recurrence::weekly(2, 9);
        rule.day_of_month = Some(4);
        assert!(validate_recurrence(&rule).is_err());

        assert!(validate_recurrence(&Recurrence::monthly(29, 0)).is_err());
        assert!(validate_recurrence(&Recurrence::weekly(7, 0)).is_err());
        assert!(validate_recurrence(&Recurrence::daily(24)).is_err());
    }
}

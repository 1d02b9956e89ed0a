//! Expiry arithmetic
//!
//! Two modes, each a pure function of (anchor, duration):
//! - Fixed: anchor plus the canonical minute count
//! - Calendar: anchor plus `count` calendar units; months and years clamp to
//!   the last valid day of the target month (Jan 31 + 1 mes = Feb 28/29)
//!
//! `FixedMinutes` durations carry no calendar unit and add minutes in both
//! modes.

use chrono::{DateTime, Days, Months, Utc};
use tenure_api::{EvaluationMode, TimeRemaining};
use tenure_util::{CalendarUnit, DurationSpec, TenureError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{anchor} + {duration} falls outside the supported date range")]
pub struct ExpiryError {
    pub anchor: DateTime<Utc>,
    pub duration: DurationSpec,
}

impl From<ExpiryError> for TenureError {
    fn from(e: ExpiryError) -> Self {
        TenureError::internal(e.to_string())
    }
}

/// Compute the expiry instant of `duration` counted from `anchor`
pub fn expiry(
    anchor: DateTime<Utc>,
    duration: &DurationSpec,
    mode: EvaluationMode,
) -> Result<DateTime<Utc>, ExpiryError> {
    let computed = match (mode, *duration) {
        (EvaluationMode::Calendar, DurationSpec::CalendarUnits { count, unit }) => {
            add_calendar(anchor, count, unit)
        }
        _ => add_minutes(anchor, duration.minutes()),
    };

    computed.ok_or(ExpiryError {
        anchor,
        duration: *duration,
    })
}

fn add_minutes(anchor: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    anchor.checked_add_signed(chrono::Duration::try_minutes(minutes)?)
}

fn add_calendar(anchor: DateTime<Utc>, count: u32, unit: CalendarUnit) -> Option<DateTime<Utc>> {
    match unit {
        CalendarUnit::Hour => anchor.checked_add_signed(chrono::Duration::try_hours(count as i64)?),
        CalendarUnit::Day => anchor.checked_add_days(Days::new(count as u64)),
        CalendarUnit::Week => anchor.checked_add_days(Days::new(count as u64 * 7)),
        CalendarUnit::Month => anchor.checked_add_months(Months::new(count)),
        CalendarUnit::Year => anchor.checked_add_months(Months::new(count.checked_mul(12)?)),
    }
}

/// Signed time left until `expires_at`, in whole minutes truncated toward zero
pub fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> TimeRemaining {
    TimeRemaining::from_total_minutes((expires_at - now).num_minutes())
}

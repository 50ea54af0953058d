use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::model::StatusLabel;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a stored date cell. Timestamps are truncated to their date.
/// Returns `None` for anything unrecognised; callers decide what that means.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.date())
        })
}

/// Lifecycle label for a booking ending on `end_date`.
///
/// Order matters: the strict `end < today` test runs before the inclusive
/// window test, so a booking ending today is `ExpiringSoon`, not `Expired`.
pub fn status(end_date: &str, alert_window_days: u32, today: NaiveDate) -> StatusLabel {
    if end_date.trim().is_empty() {
        return StatusLabel::Available;
    }
    let Some(end) = parse_date(end_date) else {
        return StatusLabel::Unknown;
    };
    if end < today {
        return StatusLabel::Expired;
    }
    if end <= today + Duration::days(i64::from(alert_window_days)) {
        return StatusLabel::ExpiringSoon;
    }
    StatusLabel::Booked
}

/// Whole days from `today` to `end_date`; negative once the date has passed.
pub fn days_remaining(end_date: &str, today: NaiveDate) -> Option<i64> {
    parse_date(end_date).map(|end| (end - today).num_days())
}

//! Quota window boundary math.
//!
//! Windows are defined in the host's local time: daily windows roll at
//! local midnight, weekly windows at Monday 00:00 local, monthly windows
//! at the first of the calendar month. Boundaries are stored in UTC.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use warden_domain::entities::QuotaType;

/// Canonical start of the window containing `now`.
pub fn window_start<Tz: TimeZone>(quota_type: QuotaType, now: &DateTime<Tz>) -> DateTime<Utc> {
    let date = now.date_naive();
    let start_date = match quota_type {
        QuotaType::Daily => date,
        QuotaType::Weekly => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
        QuotaType::Monthly => first_of_month(date),
    };
    local_midnight(start_date, &now.timezone())
}

/// Start of the window following the one containing `now`.
pub fn window_end<Tz: TimeZone>(quota_type: QuotaType, now: &DateTime<Tz>) -> DateTime<Utc> {
    let date = now.date_naive();
    let end_date = match quota_type {
        QuotaType::Daily => date + Duration::days(1),
        QuotaType::Weekly => {
            date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
                + Duration::days(7)
        }
        QuotaType::Monthly => next_month(first_of_month(date)),
    };
    local_midnight(end_date, &now.timezone())
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn next_month(first: NaiveDate) -> NaiveDate {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first)
}

/// Resolve a local calendar date's midnight to UTC. DST gaps that swallow
/// midnight fall forward to the earliest representable instant of the day.
fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = match date.and_hms_opt(0, 0, 0) {
        Some(n) => n,
        None => return Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap_or_default()),
    };
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // Midnight does not exist in this zone on this date; probe
            // forward one hour at a time until a representable instant.
            for hour in 1..=3u32 {
                if let Some(shifted) = date.and_hms_opt(hour, 0, 0)
                    && let Some(dt) = tz.from_local_datetime(&shifted).earliest()
                {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&naive)
        }
    }
}

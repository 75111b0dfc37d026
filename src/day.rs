//! Calendar-date → weekday resolution in a business timezone.
//!
//! Every weekday in the crate comes from [`resolve_day_of_week`] (or its
//! parsed-timezone twin). Nothing here reads the host clock or the host
//! timezone: "now" is always a parameter.

use chrono::{DateTime, Datelike, LocalResult, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::{CalendarDate, DayOfWeek, Min};

/// Local noon, well away from DST transitions (which happen between 00:00 and 03:00).
const NOON: NaiveTime = match NaiveTime::from_hms_opt(12, 0, 0) {
    Some(t) => t,
    None => panic!("noon is a valid time"),
};

/// Parse an IANA timezone identifier.
pub fn parse_timezone(name: &str) -> Result<Tz, EngineError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(name.to_string()))
}

/// Canonical weekday of `date` for a business located in `timezone`.
pub fn resolve_day_of_week(date: CalendarDate, timezone: &str) -> Result<DayOfWeek, EngineError> {
    let tz = parse_timezone(timezone)?;
    Ok(day_of_week_in(date, &tz))
}

/// String-input entry point: validates the date before the timezone.
pub fn resolve_day_of_week_str(date: &str, timezone: &str) -> Result<DayOfWeek, EngineError> {
    let date: CalendarDate = date.parse()?;
    resolve_day_of_week(date, timezone)
}

pub(crate) fn day_of_week_in(date: CalendarDate, tz: &Tz) -> DayOfWeek {
    let local_noon = date.naive().and_time(NOON);
    let weekday = match tz.from_local_datetime(&local_noon) {
        LocalResult::Single(instant) => instant.weekday(),
        LocalResult::Ambiguous(earliest, _) => earliest.weekday(),
        // The zone skipped this whole local date (e.g. Pacific/Apia on
        // 2011-12-30); the calendar date still names its own weekday.
        LocalResult::None => local_noon.weekday(),
    };
    DayOfWeek::from_chrono(weekday)
}

/// The calendar date it currently is in `tz`.
pub fn local_today(tz: &Tz, now: DateTime<Utc>) -> CalendarDate {
    now.with_timezone(tz).date_naive().into()
}

/// Minutes since local midnight of `now` in `tz`.
pub fn local_minute_of_day(tz: &Tz, now: DateTime<Utc>) -> Min {
    let local = now.with_timezone(tz);
    (local.hour() * 60 + local.minute()) as Min
}

/// The current local minute when `date` is today in `tz`; `None` for any other date.
pub(crate) fn minute_if_today(date: CalendarDate, tz: &Tz, now: DateTime<Utc>) -> Option<Min> {
    (local_today(tz, now) == date).then(|| local_minute_of_day(tz, now))
}

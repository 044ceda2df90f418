use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::{Serialize, Serializer};

/// Half-open query window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Window {
    #[serde(rename = "startTime", serialize_with = "serialize_timestamp")]
    pub start: DateTime<Utc>,
    #[serde(rename = "endTime", serialize_with = "serialize_timestamp")]
    pub end: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("Invalid startTime: {0}")]
    InvalidStart(String),
    #[error("Invalid endTime: {0}")]
    InvalidEnd(String),
    #[error("startTime must be before endTime")]
    Empty,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start >= end {
            return Err(WindowError::Empty);
        }
        Ok(Window { start, end })
    }

    pub fn start_time(&self) -> String {
        format_timestamp(&self.start)
    }

    pub fn end_time(&self) -> String {
        format_timestamp(&self.end)
    }
}

/// Yesterday 00:00 through today 00:00 on the wall clock of `now`.
pub fn default_window<Tz: TimeZone>(now: &DateTime<Tz>) -> Window {
    let tz = now.timezone();
    let today = now.date_naive();
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);

    Window {
        start: local_midnight(&tz, yesterday),
        end: local_midnight(&tz, today),
    }
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    // A DST jump can skip midnight; the day then starts at the end of the gap.
    (0..=3)
        .find_map(|hours| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(hours)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// Explicit bounds where given, the default window's otherwise.
pub fn resolve_window<Tz: TimeZone>(
    start: Option<&str>,
    end: Option<&str>,
    now: &DateTime<Tz>,
) -> Result<Window, WindowError> {
    let default = default_window(now);
    let start = match start {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| WindowError::InvalidStart(raw.to_string()))?,
        None => default.start,
    };
    let end = match end {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| WindowError::InvalidEnd(raw.to_string()))?,
        None => default.end,
    };
    Window::new(start, end)
}

/// `2025-03-01T00:00:00.000Z`
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_timestamp<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(value))
}

/// Parses RFC 3339, a naive date-time or a bare date. Values without an offset
/// are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

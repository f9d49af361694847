//! Parsing of user-supplied trigger times, booking dates and URLs
//!
//! All wall-clock inputs are interpreted in the configured timezone. Parsers
//! take `now` explicitly so callers (and tests) control the reference time.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use url::Url;

use super::error::{SchedulerError, SchedulerResult};

/// Accepted `trigger_datetime` layouts, tried in order
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %I:%M %p",
    "%B %d, %Y %H:%M",
    "%B %d, %Y %I:%M %p",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %I:%M %p",
];

/// Accepted legacy `trigger_time` layouts, tried in order
const TIME_FORMATS: &[&str] = &["%I:%M %p", "%I:%M%p", "%H:%M"];

/// `time_format` value selecting minutes-from-now semantics
pub const RELATIVE_FORMAT: &str = "relative";

/// Parse an absolute trigger datetime.
///
/// The result must be strictly later than `now`.
pub fn parse_trigger_datetime(input: &str, now: DateTime<Tz>) -> SchedulerResult<DateTime<Tz>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SchedulerError::missing_field("trigger_datetime"));
    }

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .ok_or_else(|| {
            SchedulerError::invalid_datetime(
                input,
                "expected e.g. 2025-12-15T10:00, 2025-12-15 10:00 AM or December 15, 2025 10:00",
            )
        })?;

    let resolved = localize(now.timezone(), naive, input)?;
    if resolved <= now {
        return Err(SchedulerError::NotInFuture {
            requested: resolved.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
            now: now.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        });
    }

    Ok(resolved)
}

/// Parse the legacy `(trigger_time, time_format)` pair.
///
/// With `time_format == "relative"` the input is a number of minutes from
/// `now`. Otherwise it is a time of day; a time that is not in the future is
/// rolled to the next day.
pub fn parse_trigger_time(
    time: &str,
    time_format: Option<&str>,
    now: DateTime<Tz>,
) -> SchedulerResult<DateTime<Tz>> {
    let time = time.trim();
    if time.is_empty() {
        return Err(SchedulerError::missing_field("trigger_time"));
    }

    if time_format.map(str::trim) == Some(RELATIVE_FORMAT) {
        let minutes: i64 = time
            .parse()
            .map_err(|_| SchedulerError::invalid_datetime(time, "relative time must be minutes"))?;
        if minutes <= 0 {
            return Err(SchedulerError::invalid_datetime(
                time,
                "relative time must be a positive number of minutes",
            ));
        }
        return Duration::try_minutes(minutes)
            .and_then(|offset| now.checked_add_signed(offset))
            .ok_or_else(|| SchedulerError::invalid_datetime(time, "relative time is out of range"));
    }

    let normalized = time.to_uppercase();
    let time_of_day = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&normalized, fmt).ok())
        .ok_or_else(|| SchedulerError::invalid_datetime(time, "expected HH:MM or h:MM AM/PM"))?;

    let tz = now.timezone();
    let mut candidate = localize(tz, now.date_naive().and_time(time_of_day), time)?;
    if candidate <= now {
        let tomorrow = now.date_naive() + Duration::days(1);
        candidate = localize(tz, tomorrow.and_time(time_of_day), time)?;
    }

    Ok(candidate)
}

/// Parse an optional `YYYY-MM-DD` booking date
pub fn parse_booking_date(input: Option<&str>) -> SchedulerResult<Option<NaiveDate>> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| SchedulerError::InvalidDate {
                input: raw.to_string(),
            }),
    }
}

/// Prefix `https://` when the URL has no http(s) scheme, then validate it
pub fn normalize_url(raw: &str) -> SchedulerResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::missing_field("url"));
    }

    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| SchedulerError::invalid_url(trimmed, e.to_string()))?;
    if parsed.host_str().is_none() {
        return Err(SchedulerError::invalid_url(trimmed, "missing host"));
    }

    Ok(candidate)
}

/// Parse a timezone name such as `Asia/Kolkata`
pub fn parse_timezone(name: &str) -> SchedulerResult<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone {
            tz: name.to_string(),
        })
}

fn localize(tz: Tz, naive: NaiveDateTime, input: &str) -> SchedulerResult<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
        SchedulerError::invalid_datetime(input, format!("time does not exist in {}", tz.name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::Asia::Kolkata;

    fn now() -> DateTime<Tz> {
        Kolkata.with_ymd_and_hms(2025, 12, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_iso_like_formats() {
        let parsed = parse_trigger_datetime("2025-12-15T10:30", now()).unwrap();
        assert_eq!(parsed.hour(), 10);
        assert_eq!(parsed.minute(), 30);

        let parsed = parse_trigger_datetime("2025-12-16 09:00 AM", now()).unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2025, 12, 16).unwrap());
    }

    #[test]
    fn test_long_month_format() {
        let parsed = parse_trigger_datetime("December 20, 2025 07:45 PM", now()).unwrap();
        assert_eq!(parsed.hour(), 19);
        assert_eq!(parsed.minute(), 45);
    }

    #[test]
    fn test_us_date_wins_over_day_first() {
        let parsed = parse_trigger_datetime("12/20/2025 11:00", now()).unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2025, 12, 20).unwrap());

        // Not a valid month, so the day-first layout applies
        let parsed = parse_trigger_datetime("20/12/2025 11:00", now()).unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2025, 12, 20).unwrap());
    }

    #[test]
    fn test_past_datetime_rejected() {
        let err = parse_trigger_datetime("2025-12-15 09:59", now()).unwrap_err();
        assert!(matches!(err, SchedulerError::NotInFuture { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = parse_trigger_datetime("tomorrow-ish", now()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidDateTime { .. }));
    }

    #[test]
    fn test_legacy_time_rolls_to_tomorrow() {
        let parsed = parse_trigger_time("09:00", None, now()).unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2025, 12, 16).unwrap());
        assert_eq!(parsed.hour(), 9);

        let parsed = parse_trigger_time("11:15 am", Some("12h"), now()).unwrap();
        assert_eq!(parsed.date_naive(), now().date_naive());
        assert_eq!(parsed.hour(), 11);
    }

    #[test]
    fn test_legacy_relative_minutes() {
        let parsed = parse_trigger_time("5", Some("relative"), now()).unwrap();
        assert_eq!(parsed - now(), Duration::minutes(5));
        assert!(parse_trigger_time("-1", Some("relative"), now()).is_err());
    }

    #[test]
    fn test_relative_minutes_out_of_range() {
        assert!(matches!(
            parse_trigger_time("1000000000000", Some("relative"), now()),
            Err(SchedulerError::InvalidDateTime { .. })
        ));
        assert!(matches!(
            parse_trigger_time(&i64::MAX.to_string(), Some("relative"), now()),
            Err(SchedulerError::InvalidDateTime { .. })
        ));
    }

    #[test]
    fn test_booking_date() {
        assert_eq!(parse_booking_date(None).unwrap(), None);
        assert_eq!(parse_booking_date(Some("  ")).unwrap(), None);
        assert!(parse_booking_date(Some("2025-12-15")).unwrap().is_some());
        assert!(matches!(
            parse_booking_date(Some("15-12-2025")),
            Err(SchedulerError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("example.com/tickets").unwrap(),
            "https://example.com/tickets"
        );
        assert_eq!(
            normalize_url("http://example.com").unwrap(),
            "http://example.com"
        );
        assert!(normalize_url("").is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Asia/Kolkata").unwrap(), Kolkata);
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}

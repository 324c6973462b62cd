use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Turn a feed-supplied date string into an absolute timestamp.
///
/// RFC 2822 first, then ISO 8601 forms (naive ones are read in `tz`), and
/// finally the current time in `tz`. Never fails.
pub fn parse_published_at(raw: &str, tz: FixedOffset) -> DateTime<FixedOffset> {
    let text = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return dt;
    }

    if let Some(dt) = parse_iso(text, tz) {
        return dt;
    }

    tracing::warn!(raw, "unparsable publish date, using current time");
    Utc::now().with_timezone(&tz)
}

fn parse_iso(text: &str, tz: FixedOffset) -> Option<DateTime<FixedOffset>> {
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }

    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt);
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return tz.from_local_datetime(&naive).single();
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| tz.from_local_datetime(&naive).single())
}

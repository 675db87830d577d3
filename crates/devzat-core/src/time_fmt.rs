//! Message timestamp formatting: relative durations for recent messages,
//! wall-clock for everything else, each user's `FormatTime24` preference
//! switching between 12/24-hour clocks. Ported from `timeMessage`/`fmtDuration`
//! in `original_source/util.go`.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Render a human relative duration like the original's `fmtDuration`:
/// floors to whole units, and anything under a minute reads as "just now".
pub fn relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at);
    let (dur, suffix) = if diff.num_seconds() >= 0 {
        (diff, "ago")
    } else {
        (-diff, "from now")
    };

    let secs = dur.num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }

    let (value, unit) = if secs < 3600 {
        (secs / 60, "m")
    } else if secs < 86400 {
        (secs / 3600, "h")
    } else {
        (secs / 86400, "d")
    };

    format!("{value}{unit} {suffix}")
}

/// Render a wall-clock timestamp in the given timezone, 24h or 12h per
/// `format_24h`. Matches the original's `3:04`/`15:04` Go time layouts.
pub fn wall_clock(at: DateTime<Utc>, tz: Tz, format_24h: bool) -> String {
    let local = at.with_timezone(&tz);
    if format_24h {
        local.format("%H:%M").to_string()
    } else {
        local.format("%-I:%M%P").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn sub_minute_reads_as_just_now() {
        let now = Utc::now();
        let at = now - Duration::seconds(30);
        assert_eq!(relative(at, now), "just now");
    }

    #[test]
    fn minutes_are_floored() {
        let now = Utc::now();
        let at = now - Duration::seconds(150);
        assert_eq!(relative(at, now), "2m ago");
    }

    #[test]
    fn wall_clock_respects_24h_flag() {
        let at = DateTime::parse_from_rfc3339("2026-07-31T15:04:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(wall_clock(at, chrono_tz::UTC, true), "15:04");
        assert_eq!(wall_clock(at, chrono_tz::UTC, false), "3:04pm");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Time-expression parsing for `cron.add`/`cron.update` one-shot schedules
//! (§4.9: "Time strings support ISO, relative (\"in 2 hours\"), and
//! \"today|tomorrow [at] H:MM [am/pm]\", resolved in the user's IANA
//! timezone").

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^in\s+(\d+)\s*(second|minute|hour|day|week)s?$").unwrap())
}

fn today_tomorrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(today|tomorrow)\s*(?:at)?\s*(\d{1,2}):(\d{2})\s*(am|pm)?$").unwrap()
    })
}

/// Parses `input` into an absolute UTC timestamp, interpreting clock-time
/// expressions in `tz`.
pub fn parse_time_expression(input: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Some(caps) = relative_re().captures(input) {
        let amount: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let duration = match unit.as_str() {
            "second" => chrono::Duration::seconds(amount),
            "minute" => chrono::Duration::minutes(amount),
            "hour" => chrono::Duration::hours(amount),
            "day" => chrono::Duration::days(amount),
            "week" => chrono::Duration::weeks(amount),
            _ => return None,
        };
        return Some(Utc::now() + duration);
    }

    if let Some(caps) = today_tomorrow_re().captures(input) {
        let day = &caps[1];
        let mut hour: u32 = caps[2].parse().ok()?;
        let minute: u32 = caps[3].parse().ok()?;
        if let Some(meridiem) = caps.get(4) {
            let meridiem = meridiem.as_str().to_lowercase();
            if meridiem == "pm" && hour < 12 {
                hour += 12;
            }
            if meridiem == "am" && hour == 12 {
                hour = 0;
            }
        }

        let now_local = Utc::now().with_timezone(&tz);
        let target_date = if day.eq_ignore_ascii_case("tomorrow") {
            now_local.date_naive() + chrono::Duration::days(1)
        } else {
            now_local.date_naive()
        };
        let naive_time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let naive_dt = target_date.and_time(naive_time);
        let local_dt = tz.from_local_datetime(&naive_dt).single()?;
        return Some(local_dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_timestamps() {
        let parsed = parse_time_expression("2026-08-01T12:00:00Z", chrono_tz::UTC).unwrap();
        assert_eq!(parsed.year(), 2026);
    }

    #[test]
    fn parses_relative_hours() {
        let before = Utc::now();
        let parsed = parse_time_expression("in 2 hours", chrono_tz::UTC).unwrap();
        assert!(parsed > before + chrono::Duration::minutes(119));
        assert!(parsed < before + chrono::Duration::minutes(121));
    }

    #[test]
    fn parses_relative_singular_unit() {
        let parsed = parse_time_expression("in 1 hour", chrono_tz::UTC);
        assert!(parsed.is_some());
    }

    #[test]
    fn parses_today_at_with_meridiem() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let parsed = parse_time_expression("today at 3:00pm", tz);
        assert!(parsed.is_some());
    }

    #[test]
    fn rejects_unrecognized_input() {
        assert!(parse_time_expression("whenever works", chrono_tz::UTC).is_none());
    }
}

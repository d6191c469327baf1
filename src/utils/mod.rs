//! Common utilities and helper functions

pub mod retry;

use chrono::{NaiveDate, NaiveTime};

/// Format a date with a short weekday, e.g. `2025-01-06 (Mon)`
pub fn format_day(date: NaiveDate) -> String {
    format!("{} ({})", date, date.format("%a"))
}

/// Parse an "HH:MM" string
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Render a usage bar such as `[####------]`
pub fn usage_bar(used: u32, limit: u32, width: usize) -> String {
    let filled = if limit == 0 {
        width
    } else {
        ((used as f64 / limit as f64) * width as f64).round() as usize
    }
    .min(width);

    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_day() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert_eq!(format_day(date), "2025-01-06 (Mon)");
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm(" 06:30 "), NaiveTime::from_hms_opt(6, 30, 0));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("noon"), None);
    }

    #[test]
    fn test_usage_bar() {
        assert_eq!(usage_bar(0, 2, 4), "[----]");
        assert_eq!(usage_bar(1, 2, 4), "[##--]");
        assert_eq!(usage_bar(3, 2, 4), "[####]");
        assert_eq!(usage_bar(0, 0, 4), "[####]");
    }
}

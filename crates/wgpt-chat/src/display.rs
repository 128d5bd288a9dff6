//! Small text helpers for the conversation list and attachment chips.

use chrono::{DateTime, Utc};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Sidebar label for an instant relative to `now`.
///
/// Whole days are counted by rounding the distance up, so anything within
/// the last 24 hours is "Today".
pub fn relative_date(instant: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff_ms = (now - instant).num_milliseconds().abs();
    let days = (diff_ms + DAY_MS - 1) / DAY_MS;
    match days {
        0 | 1 => "Today".to_string(),
        2 => "Yesterday".to_string(),
        3..=7 => format!("{} days ago", days - 1),
        _ => instant.format("%-m/%-d/%Y").to_string(),
    }
}

/// Human-readable byte count: `0 Bytes`, `512 Bytes`, `1.5 KB`, `10 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

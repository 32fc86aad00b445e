use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone};

/// Text sent when the operator supplies none.
pub const DEFAULT_ALERT_TEXT: &str = "Generic Kizomba Alert!";

/// Prefix `text` with the operator's local time of day.
///
/// Missing or empty text is replaced by `default_text`.
pub fn format_alert(text: Option<&str>, default_text: &str) -> String {
    format_alert_at(text, default_text, &Local::now())
}

pub fn format_alert_at<Tz>(text: Option<&str>, default_text: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let text = match text {
        Some(t) if !t.is_empty() => t,
        _ => default_text,
    };
    format!("[{}] {}", at.format("%H:%M:%S"), text)
}

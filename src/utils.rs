use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use scraper::Html;

pub const PLATFORM_DOMAIN: &str = "myworkdayjobs.com";
pub const POSTED_TODAY: &str = "Posted Today";
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
pub const RUN_ID_LEN: usize = 8;

/// Plain text of an html fragment: one line per text node, trimmed, blanks dropped.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let lines: Vec<&str> = fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    lines.join("\n")
}

/// Accepts the date shapes the platform emits: `2024-05-01`,
/// `2024-05-01T09:00:00.000Z` and offset-less timestamps.
pub fn parse_start_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}

pub fn truncate_message(msg: &str, limit: usize) -> String {
    msg.chars().take(limit).collect()
}

pub fn get_random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn new_run_id() -> String {
    get_random_string(RUN_ID_LEN)
}

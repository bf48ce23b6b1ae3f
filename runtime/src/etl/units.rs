//! Provider count strings ("5,841", "1.2w", "3.5万", "1.1亿") to integers.

use regex::Regex;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<num>[0-9]+(?:\.[0-9]+)?)\s*(?P<unit>[wWkK万亿]?)\+?$")
            .expect("count regex is valid")
    })
}

/// Parse a display count. Empty strings and placeholders such as "-" parse
/// as `None`.
pub fn parse_count(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    let caps = pattern().captures(&cleaned)?;
    let num: f64 = caps.name("num")?.as_str().parse().ok()?;
    let scale = match caps.name("unit").map(|m| m.as_str()).unwrap_or("") {
        "w" | "W" | "万" => 10_000.0,
        "k" | "K" => 1_000.0,
        "亿" => 100_000_000.0,
        _ => 1.0,
    };
    Some((num * scale).round() as i64)
}

/// [`parse_count`] with unparseable input treated as zero.
pub fn count_or_zero(raw: &str) -> i64 {
    parse_count(raw).unwrap_or(0)
}

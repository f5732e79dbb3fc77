use regex::Regex;
use std::sync::OnceLock;

/// What to do with duration tokens whose unit is not recognized.
///
/// The listing renders pair ages as compound strings like `"1mo2d3h"`.
/// `Lenient` counts unknown units as zero minutes, which silently shortens
/// the reported age; `Strict` rejects the whole string instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPolicy {
    Lenient,
    Strict,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)(mo|s|m|h|d)").expect("valid age pattern"))
}

/// Total minutes encoded by a compound age string, e.g. `"1h30m"` -> 90.
///
/// Returns `None` only under `UnitPolicy::Strict` when the string contains
/// text outside the recognized `<integer><unit>` tokens. Under `Lenient` the
/// function is total; an empty or fully unrecognized string parses to 0.
pub fn age_minutes(raw: &str, policy: UnitPolicy) -> Option<f64> {
    if policy == UnitPolicy::Strict {
        let residue = token_pattern().replace_all(raw, "");
        if !residue.trim().is_empty() {
            return None;
        }
    }

    let mut total = 0.0;
    for capture in token_pattern().captures_iter(raw) {
        let count: f64 = capture[1].parse().unwrap_or(0.0);
        let factor = match &capture[2] {
            "s" => 1.0 / 60.0,
            "m" => 1.0,
            "h" => 60.0,
            "d" => 1440.0,
            "mo" => 43200.0,
            _ => 0.0,
        };
        total += count * factor;
    }
    Some(total)
}

/// Whether an age falls inside the freshness window.
pub fn is_fresh(age_minutes: f64, threshold_minutes: f64) -> bool {
    age_minutes <= threshold_minutes
}

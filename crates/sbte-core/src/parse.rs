//! Text grammars for durations and dates
//!
//! Every token is matched independently of the others, so token order in the
//! input does not matter. Tokens must be bounded by whitespace or the ends of
//! the input. Matching is case-insensitive.

use lazy_static::lazy_static;
use regex::Regex;

use crate::units::{TimeSystem, TimeUnit};

/// One optional value per [`TimeUnit`], coarsest first
pub type UnitTokens = [Option<i64>; 6];

lazy_static! {
    static ref DURATION_TOKENS: [Regex; 6] = [
        token_regex(r"(?i)(?:\s|^)(\d+)y(?:\s|$)"),
        token_regex(r"(?i)(?:\s|^)(\d+)mo(?:\s|$)"),
        token_regex(r"(?i)(?:\s|^)(\d+)d(?:\s|$)"),
        token_regex(r"(?i)(?:\s|^)(\d+)h(?:\s|$)"),
        token_regex(r"(?i)(?:\s|^)(\d+)m(?:\s|$)"),
        token_regex(r"(?i)(?:\s|^)(\d+)s(?:\s|$)"),
    ];
    static ref SLOW_SUFFIX: Regex = token_regex(r"(?i)(?:\s|^)-u$");
    static ref FAST_SUFFIX: Regex = token_regex(r"(?i)(?:\s|^)-s$");
    static ref ANY_SUFFIX: Regex = token_regex(r"(?i)(?:\s|^)-[us]$");
    static ref DATE_YEAR: Regex = token_regex(r"(?i)(?:\s|^)Y(\d+)(?:\s|$)");
    static ref DATE_MONTH: Regex = token_regex(r"(?i)(?:\s|^)M(\d+)(?:\s|$)");
    static ref DATE_DAY: Regex = token_regex(r"(?i)(?:\s|^)D?(\d+)(?:\s|$)");
    static ref TIME_HOUR: Regex = token_regex(r"(?:\s|^)(\d+):");
    static ref TIME_MINUTE: Regex = token_regex(r"(?:\s|^)\d*:(\d+)");
    static ref TIME_SECOND: Regex = token_regex(r"(?:\s|^)\d*:\d*:(\d+)");
    static ref FAST_MONTH_NAMES: Vec<(Regex, usize)> = month_matchers(TimeSystem::Fast);
    static ref SLOW_MONTH_NAMES: Vec<(Regex, usize)> = month_matchers(TimeSystem::Slow);
}

/// Compile a literal pattern for a `lazy_static` table.
///
/// # Panics
///
/// Panics if `pattern` is not a valid regex; callers only pass literals.
pub fn token_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static token pattern")
}

/// Name matchers for one system, longest name first so that
/// "Late Spring" wins over "Spring"
fn month_matchers(system: TimeSystem) -> Vec<(Regex, usize)> {
    let mut names: Vec<(&str, usize)> = system
        .full_month_names()
        .iter()
        .chain(system.short_month_names().iter())
        .enumerate()
        .map(|(i, name)| (*name, i % 12))
        .collect();
    names.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    names
        .into_iter()
        .map(|(name, index)| (token_regex(&format!(r"(?i)\b{}\b", regex::escape(name))), index))
        .collect()
}

/// Text of the first capture group of the first match
pub fn capture_text<'t>(regex: &Regex, text: &'t str) -> Option<&'t str> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn capture(regex: &Regex, text: &str) -> Option<i64> {
    capture_text(regex, text).and_then(|digits| digits.parse::<i64>().ok())
}

/// Read the trailing locale marker (`-u` slow, `-s` fast, or a bare `U`/`S`)
pub fn locale_of(text: &str) -> Option<TimeSystem> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("u") || SLOW_SUFFIX.is_match(text) {
        Some(TimeSystem::Slow)
    } else if trimmed.eq_ignore_ascii_case("s") || FAST_SUFFIX.is_match(text) {
        Some(TimeSystem::Fast)
    } else {
        None
    }
}

/// The text without its trailing locale marker
pub fn strip_locale(text: &str) -> &str {
    let trimmed = text.trim();
    match ANY_SUFFIX.find(trimmed) {
        Some(m) => trimmed[..m.start()].trim_end(),
        None => trimmed,
    }
}

/// Text that is a single finite number
pub fn numeric(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extract `<N>y <N>mo <N>d <N>h <N>m <N>s` tokens
pub fn duration_tokens(text: &str) -> UnitTokens {
    let mut out = [None; 6];
    for (slot, regex) in out.iter_mut().zip(DURATION_TOKENS.iter()) {
        *slot = capture(regex, text);
    }
    out
}

/// True if a duration token carries more digits than an `i64` holds
pub fn has_overflow(text: &str) -> bool {
    DURATION_TOKENS.iter().any(|regex| {
        capture_text(regex, text).is_some_and(|digits| digits.parse::<i64>().is_err())
    })
}

/// Extract date tokens: `Y<n>`, `M<n>` or a month name, `D<n>` or a bare
/// number, and `H:M:S`. The month is returned 0-based.
pub fn date_tokens(text: &str, system: TimeSystem) -> UnitTokens {
    let month = capture(&DATE_MONTH, text)
        .map(|m| m - 1)
        .or_else(|| month_by_name(text, system).map(|i| i as i64));
    [
        capture(&DATE_YEAR, text),
        month,
        capture(&DATE_DAY, text),
        capture(&TIME_HOUR, text),
        capture(&TIME_MINUTE, text),
        capture(&TIME_SECOND, text),
    ]
}

/// Find a month name or abbreviation of the given system in free text
pub fn month_by_name(text: &str, system: TimeSystem) -> Option<usize> {
    let matchers = match system {
        TimeSystem::Fast => &*FAST_MONTH_NAMES,
        TimeSystem::Slow => &*SLOW_MONTH_NAMES,
    };
    matchers
        .iter()
        .find(|(regex, _)| regex.is_match(text))
        .map(|(_, index)| *index)
}

/// True if no unit was given
pub fn is_empty(tokens: &UnitTokens) -> bool {
    tokens.iter().all(Option::is_none)
}

/// Index helper for token arrays
#[inline]
pub fn get(tokens: &UnitTokens, unit: TimeUnit) -> Option<i64> {
    tokens[unit.index()]
}

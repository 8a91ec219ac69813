//! Value normalization for display text scraped from the listing table.
//!
//! Everything here is pure and total: malformed input degrades to a
//! sentinel (`"0"` for numbers, `None` for optional text) instead of
//! returning an error, so a single odd cell can never abort a row.

use once_cell::sync::Lazy;
use regex::Regex;

// Safety: compile-time constant patterns, Regex::new cannot fail on them.
static DECIMAL_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d*\.\d+|\d+)([KkMmBbTt])?").unwrap()
});

static SIGNED_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([-\u{2212}\u{2013}]?)(\d*\.\d+|\d+)").unwrap()
});

/// Cell contents the source uses for "no data".
const PLACEHOLDERS: &[&str] = &["-", "--", "—", "n/a", "na", "?", "no data"];

/// Outcome of parsing a numeric display string.
///
/// `normalize_number` collapses `Missing` into `"0"`; callers that want to
/// tell a real zero from a parse failure use `parse_number` directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumberParse {
    /// Canonical decimal text (no sign, no grouping, no trailing zeros).
    Value(String),
    /// No numeric substring was found.
    Missing,
}

impl NumberParse {
    pub fn is_missing(&self) -> bool {
        matches!(self, NumberParse::Missing)
    }

    /// The canonical text, with `"0"` standing in for a failed parse.
    pub fn into_text(self) -> String {
        match self {
            NumberParse::Value(text) => text,
            NumberParse::Missing => "0".to_string(),
        }
    }

    /// The parsed value as `f64`, `None` when missing.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            NumberParse::Value(text) => text.parse::<f64>().ok(),
            NumberParse::Missing => None,
        }
    }
}

/// Convert display text such as `"$1.2B"` or `"24,402,140,525"` into a
/// canonical decimal string. Returns `"0"` when nothing numeric is found.
pub fn normalize_number(raw: &str) -> String {
    parse_number(raw).into_text()
}

/// Parse display text into canonical decimal text.
///
/// Currency symbols, grouping characters and whitespace are dropped. A
/// K/M/B/T suffix directly after the literal scales it by 10^3/10^6/10^9/10^12.
/// Scaling shifts the decimal point in the digit string, so the result is
/// exact for any number of fractional digits.
pub fn parse_number(raw: &str) -> NumberParse {
    let compact = strip_grouping(raw);
    if compact.is_empty() {
        return NumberParse::Missing;
    }
    let unified = unify_decimal_separator(&compact);

    let Some(caps) = DECIMAL_LITERAL.captures(&unified) else {
        return NumberParse::Missing;
    };
    let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
    let literal = caps.get(1).map(|m| m.as_str()).unwrap_or("0");

    // "3.5Bitcoin" is a word, not a magnitude suffix.
    let suffix_is_word = unified[whole..]
        .chars()
        .next()
        .map(|c| c.is_alphabetic())
        .unwrap_or(false);

    let exponent = match caps.get(2).map(|m| m.as_str()) {
        Some(_) if suffix_is_word => 0,
        Some(s) => magnitude_exponent(s),
        None => 0,
    };

    NumberParse::Value(scale_decimal(literal, exponent))
}

/// Sign-preserving percent change, e.g. `"-1.23%"` → `"-1.23"`.
///
/// The listing often renders a decline as an unsigned number next to a
/// downward caret; `negative_hint` carries that caret into the sign.
pub fn normalize_change(raw: &str, negative_hint: bool) -> Option<String> {
    let compact = strip_grouping(raw).replace('+', "");
    let unified = unify_decimal_separator(&compact);
    let caps = SIGNED_LITERAL.captures(&unified)?;

    let minus = caps.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
    let value = scale_decimal(caps.get(2)?.as_str(), 0);

    if value == "0" {
        return Some(value);
    }
    if minus || negative_hint {
        Some(format!("-{}", value))
    } else {
        Some(value)
    }
}

/// Parse a rank cell; ranks are positive, so 0 is treated as missing.
pub fn parse_rank(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(rank) => Some(rank),
    }
}

/// Collapse whitespace; `None` for empty cells and "no data" placeholders.
pub fn clean_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || PLACEHOLDERS.contains(&collapsed.to_lowercase().as_str()) {
        None
    } else {
        Some(collapsed)
    }
}

/// URL-safe slug from a display name: lower-cased, whitespace runs become `-`.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

fn magnitude_exponent(suffix: &str) -> usize {
    match suffix.to_ascii_uppercase().as_str() {
        "K" => 3,
        "M" => 6,
        "B" => 9,
        "T" => 12,
        _ => 0,
    }
}

/// Drop whitespace (including no-break and narrow no-break spaces) and
/// apostrophe-style grouping marks.
fn strip_grouping(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\u{a0}' | '\u{202f}' | '\'' | '\u{2019}'))
        .collect()
}

/// Rewrite the string so `.` is the only decimal separator and commas are gone.
///
/// - both `.` and `,` present, last `,` after last `.`: European (`1.234,56`)
/// - a single `,` not followed by exactly three digits: decimal comma (`12,5`)
/// - more than one `.` and no `,`: dots are thousands separators (`1.234.567`)
/// - a single `.` is always decimal, so `1.234` reads as one point two three four
/// - otherwise commas are thousands separators
fn unify_decimal_separator(s: &str) -> String {
    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), None) if s.matches('.').count() > 1 => s.replace('.', ""),
        (None, Some(comma)) if s.matches(',').count() == 1 => {
            let trailing_digits = s[comma + 1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .count();
            if trailing_digits == 3 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        _ => s.replace(',', ""),
    }
}

/// Shift the decimal point of `literal` right by `exponent` places and
/// return it in canonical form.
fn scale_decimal(literal: &str, exponent: usize) -> String {
    let (int_part, frac_part) = literal.split_once('.').unwrap_or((literal, ""));

    let mut digits = String::with_capacity(int_part.len() + frac_part.len() + exponent);
    digits.push_str(int_part);
    digits.push_str(frac_part);

    let point = int_part.len() + exponent;
    while digits.len() < point {
        digits.push('0');
    }
    let (int_digits, frac_digits) = digits.split_at(point);

    let int_digits = int_digits.trim_start_matches('0');
    let frac_digits = frac_digits.trim_end_matches('0');
    let int_digits = if int_digits.is_empty() { "0" } else { int_digits };

    if frac_digits.is_empty() {
        int_digits.to_string()
    } else {
        format!("{}.{}", int_digits, frac_digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_suffixes() {
        assert_eq!(normalize_number("$1.2B"), "1200000000");
        assert_eq!(normalize_number("$3K"), "3000");
        assert_eq!(normalize_number("4.56m"), "4560000");
        assert_eq!(normalize_number("$1.23T"), "1230000000000");
        assert_eq!(normalize_number("0.5k"), "500");
    }

    #[test]
    fn test_scaling_is_exact() {
        // 0.1 * 1e3 in floating point is 100.00000000000001
        assert_eq!(normalize_number("0.1K"), "100");
        assert_eq!(normalize_number("1.234567891234B"), "1234567891.234");
    }

    #[test]
    fn test_currency_and_grouping_stripped() {
        assert_eq!(normalize_number("$24,402,140,525"), "24402140525");
        assert_eq!(normalize_number("€ 1 234.50"), "1234.5");
        assert_eq!(normalize_number("$0.00001234"), "0.00001234");
        assert_eq!(normalize_number("  $67,012.08 "), "67012.08");
    }

    #[test]
    fn test_locale_separators() {
        assert_eq!(normalize_number("1.234,56 €"), "1234.56");
        assert_eq!(normalize_number("12,5"), "12.5");
        assert_eq!(normalize_number("1,234"), "1234");
        assert_eq!(normalize_number("1'234'567"), "1234567");
        assert_eq!(normalize_number("1.234.567"), "1234567");
        assert_eq!(normalize_number("€1.234.567,89"), "1234567.89");
        assert_eq!(normalize_number("1.234"), "1.234");
    }

    #[test]
    fn test_never_fails_and_defaults_to_zero() {
        assert_eq!(normalize_number(""), "0");
        assert_eq!(normalize_number("   "), "0");
        assert_eq!(normalize_number("N/A"), "0");
        assert_eq!(normalize_number("$--"), "0");
        assert_eq!(normalize_number("💰🚀"), "0");
        assert_eq!(normalize_number("."), "0");
    }

    #[test]
    fn test_parse_number_distinguishes_zero_from_missing() {
        assert_eq!(parse_number("$0.00"), NumberParse::Value("0".to_string()));
        assert!(parse_number("--").is_missing());
        assert_eq!(parse_number("$1.5M").to_f64(), Some(1_500_000.0));
    }

    #[test]
    fn test_suffix_followed_by_word_is_not_a_magnitude() {
        assert_eq!(normalize_number("3.5Bitcoin"), "3.5");
    }

    #[test]
    fn test_change_sign_preserved() {
        assert_eq!(normalize_change("-1.23%", false), Some("-1.23".to_string()));
        assert_eq!(normalize_change("+4.50%", false), Some("4.5".to_string()));
        assert_eq!(normalize_change("0.87%", true), Some("-0.87".to_string()));
        assert_eq!(normalize_change("0.00%", true), Some("0".to_string()));
        assert_eq!(normalize_change("--", false), None);
    }

    #[test]
    fn test_rank_and_text() {
        assert_eq!(parse_rank(" 12 "), Some(12));
        assert_eq!(parse_rank("#1"), Some(1));
        assert_eq!(parse_rank("0"), None);
        assert_eq!(parse_rank(""), None);

        assert_eq!(clean_text("  19.8M \n BTC "), Some("19.8M BTC".to_string()));
        assert_eq!(clean_text("--"), None);
        assert_eq!(clean_text("   "), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Bitcoin Cash"), "bitcoin-cash");
        assert_eq!(slugify("  Wrapped   Ether "), "wrapped-ether");
    }
}

use std::sync::LazyLock;

use fancy_regex::Regex;

static FLOAT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?")
        .expect("float prefix pattern")
});

/// Lenient integer parsing with `parseInt` semantics: leading whitespace
/// is skipped, an optional sign and `0x` prefix are honored, and parsing
/// stops at the first character that is not a digit of the active radix.
/// Returns `None` when no digit was consumed at all.
pub(crate) fn parse_int_prefix(src: &str) -> Option<i64> {
    let trimmed = src.trim_start();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (radix, digits) = match unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        Some(rest) => (16u32, rest),
        None => (10u32, unsigned),
    };

    let mut value: i64 = 0;
    let mut consumed_any = false;
    for ch in digits.chars() {
        let Some(digit) = ch.to_digit(radix) else {
            break;
        };
        consumed_any = true;
        value = value
            .saturating_mul(i64::from(radix))
            .saturating_add(i64::from(digit));
    }

    if !consumed_any {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Lenient float parsing with `parseFloat` semantics: leading whitespace
/// is skipped and the longest numeric prefix wins, so `"12.5abc"` parses
/// as `12.5`. An `Infinity` prefix parses as infinity; callers that only
/// want finite values filter on the result. Returns `None` when the
/// input has no numeric prefix.
pub(crate) fn parse_float_prefix(src: &str) -> Option<f64> {
    let trimmed = src.trim_start();
    if let Some(unsigned) = trimmed.strip_prefix('-') {
        if unsigned.starts_with("Infinity") {
            return Some(f64::NEG_INFINITY);
        }
    } else if trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .starts_with("Infinity")
    {
        return Some(f64::INFINITY);
    }

    let matched = FLOAT_PREFIX.find(trimmed).ok().flatten()?;
    matched.as_str().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_prefix_stops_at_first_non_digit() {
        assert_eq!(parse_int_prefix("12abc"), Some(12));
        assert_eq!(parse_int_prefix("3.7"), Some(3));
        assert_eq!(parse_int_prefix("  -42 units"), Some(-42));
    }

    #[test]
    fn int_prefix_honors_hex() {
        assert_eq!(parse_int_prefix("0x1A"), Some(26));
        assert_eq!(parse_int_prefix("-0x0f"), Some(-15));
        assert_eq!(parse_int_prefix("0x"), None);
    }

    #[test]
    fn int_prefix_rejects_non_numeric_input() {
        assert_eq!(parse_int_prefix(""), None);
        assert_eq!(parse_int_prefix("abc"), None);
        assert_eq!(parse_int_prefix("+"), None);
    }

    #[test]
    fn int_prefix_saturates_instead_of_overflowing() {
        assert_eq!(
            parse_int_prefix("99999999999999999999999"),
            Some(i64::MAX)
        );
    }

    #[test]
    fn float_prefix_accepts_common_shapes() {
        assert_eq!(parse_float_prefix("12.5"), Some(12.5));
        assert_eq!(parse_float_prefix(".5"), Some(0.5));
        assert_eq!(parse_float_prefix("12."), Some(12.0));
        assert_eq!(parse_float_prefix("+3"), Some(3.0));
        assert_eq!(parse_float_prefix("1e2"), Some(100.0));
    }

    #[test]
    fn float_prefix_takes_longest_numeric_prefix() {
        assert_eq!(parse_float_prefix("12.5abc"), Some(12.5));
        assert_eq!(parse_float_prefix(" 7 "), Some(7.0));
        assert_eq!(parse_float_prefix("1e"), Some(1.0));
    }

    #[test]
    fn float_prefix_rejects_non_numeric_input() {
        assert_eq!(parse_float_prefix("abc"), None);
        assert_eq!(parse_float_prefix("."), None);
        assert_eq!(parse_float_prefix(""), None);
    }

    #[test]
    fn float_prefix_recognizes_infinity() {
        assert_eq!(parse_float_prefix("Infinity"), Some(f64::INFINITY));
        assert_eq!(parse_float_prefix("-Infinity"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float_prefix("+Infinity and beyond"), Some(f64::INFINITY));
    }
}

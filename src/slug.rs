use std::sync::LazyLock;

use fancy_regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static NON_ALPHANUMERIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug collapse pattern"));

/// Turns free text into a lowercase, hyphen-delimited identifier suitable
/// for URLs. Accented characters are folded to their base letters before
/// the collapse, so `"Crème Brûlée"` slugs as `"creme-brulee"`.
///
/// Idempotent: `slugify(slugify(x)) == slugify(x)`.
pub fn slugify(input: &str) -> String {
    let folded: String = input
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .collect();
    let collapsed = NON_ALPHANUMERIC_RUN.replace_all(&folded, "-");
    collapsed.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_punctuation_runs_to_single_hyphens() {
        assert_eq!(slugify("Gift Box!!"), "gift-box");
        assert_eq!(slugify("Scented -- Candle"), "scented-candle");
    }

    #[test]
    fn strips_leading_and_trailing_hyphens() {
        assert_eq!(slugify("  Multi   Space "), "multi-space");
        assert_eq!(slugify("--wrapped--"), "wrapped");
    }

    #[test]
    fn folds_accents_to_base_letters() {
        assert_eq!(slugify("Crème Brûlée Kit"), "creme-brulee-kit");
        assert_eq!(slugify("Señor Ñandú"), "senor-nandu");
    }

    #[test]
    fn keeps_digits() {
        assert_eq!(slugify("Advent Calendar 2025"), "advent-calendar-2025");
    }

    #[test]
    fn empty_and_symbol_only_inputs_slug_to_empty() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!! ???"), "");
    }

    #[test]
    fn already_slugged_input_is_unchanged() {
        assert_eq!(slugify("holiday-gift"), "holiday-gift");
    }
}

//! String helpers shared by the match factories and the evaluator.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use regex_syntax::ast::parse::Parser as RegexParser;
use unicode_normalization::UnicodeNormalization;

use crate::error::ParseError;

/// NFC-normalize `text`, lowercasing it unless the search is case sensitive.
pub fn normalize(text: &str, case_sensitive: bool) -> String {
    let composed: String = text.nfc().collect();
    if case_sensitive {
        composed
    } else {
        composed.to_lowercase()
    }
}

/// How a compiled pattern is applied to candidate strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMode {
    /// The whole string must match.
    Full,
    /// Some substring must match.
    Find,
}

/// Compile a user-supplied regular expression.
///
/// Matching is case-insensitive unless `case_sensitive`, and `.` also
/// matches line breaks. Syntax errors carry the character offset of the
/// problem inside `pattern`.
pub fn compile_pattern(
    pattern: &str,
    case_sensitive: bool,
    mode: PatternMode,
) -> Result<Regex, ParseError> {
    if let Err(err) = RegexParser::new().parse(pattern) {
        let byte_offset = err.span().start.offset;
        let offset = pattern
            .get(..byte_offset)
            .map(|prefix| prefix.chars().count());
        return Err(ParseError::regex(pattern, offset, err.kind().to_string()));
    }

    let source = match mode {
        PatternMode::Full => format!(r"\A(?:{pattern})\z"),
        PatternMode::Find => pattern.to_string(),
    };
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|err| ParseError::regex(pattern, None, err.to_string()))
}

const TRUE_VALUES: &[&str] = &["true", "yes", "1", "on"];
const FALSE_VALUES: &[&str] = &["false", "no", "0", "off"];

/// Whether a tag value is one of the OSM spellings of "true".
pub fn is_true(value: &str) -> bool {
    TRUE_VALUES.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// Whether a tag value is one of the OSM spellings of "false".
pub fn is_false(value: &str) -> bool {
    FALSE_VALUES.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// A finite number parsed from `value`, if it is one.
pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Compare a tag value with a reference: numerically when both sides are
/// finite numbers, otherwise lexicographically.
pub fn compare_values(value: &str, reference: &str, reference_number: Option<f64>) -> Ordering {
    match (parse_number(value), reference_number) {
        (Some(value), Some(reference)) => value.total_cmp(&reference),
        _ => value.cmp(reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_composes_and_lowercases() {
        // "e" followed by a combining acute accent
        assert_eq!(normalize("Cafe\u{301}", false), "caf\u{e9}");
        assert_eq!(normalize("Cafe\u{301}", true), "Caf\u{e9}");
    }

    #[test]
    fn test_full_pattern_is_anchored() {
        let re = compile_pattern("ba.", false, PatternMode::Full).unwrap();
        assert!(re.is_match("BAR"));
        assert!(!re.is_match("foobar"));

        let re = compile_pattern("ba.", true, PatternMode::Find).unwrap();
        assert!(re.is_match("foobar"));
        assert!(!re.is_match("FOOBAR"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_group() {
        let re = compile_pattern("a|b", false, PatternMode::Full).unwrap();
        assert!(re.is_match("a"));
        assert!(!re.is_match("ab"));
    }

    #[test]
    fn test_dot_matches_newline() {
        let re = compile_pattern("a.b", false, PatternMode::Full).unwrap();
        assert!(re.is_match("a\nb"));
    }

    #[test]
    fn test_invalid_pattern_reports_offset() {
        let err = compile_pattern("ab[", false, PatternMode::Find).unwrap_err();
        assert!(err.message.starts_with("The regex \"ab[\" had a parse error at offset 2"));
    }

    #[test]
    fn test_boolean_values() {
        assert!(is_true("Yes"));
        assert!(is_true("1"));
        assert!(!is_true("maybe"));
        assert!(is_false("OFF"));
        assert!(!is_false("true"));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values("10", "9", parse_number("9")), Ordering::Greater);
        assert_eq!(compare_values("abc", "abd", None), Ordering::Less);
        assert_eq!(compare_values("10", "9x", parse_number("9x")), Ordering::Less);
        assert_eq!(compare_values("NaN", "1", parse_number("1")), Ordering::Greater);
    }
}

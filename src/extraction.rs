//! Text extraction for the authentication funnel
//!
//! Pulls PINs and last-4-digit account fragments out of free text and
//! matches restricted product keywords on whole-word boundaries.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    /// Explicit PIN phrasings, highest priority first
    static ref PIN_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)pin\s+is\s+(\d{4})").unwrap(),
        Regex::new(r"(?i)pin:?\s*(\d{4})").unwrap(),
        Regex::new(r"(?i)my\s+pin\s+(?:is\s+)?(\d{4})").unwrap(),
        Regex::new(r"(?i)pin.*?(\d{4})").unwrap(),
        Regex::new(r"(?i)(\d{4}).*?pin").unwrap(),
    ];

    /// Explicit last-4-digit phrasings; checked before any bare digit scan
    static ref LAST_DIGIT_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)last\s+four\s+digits?\s+(?:are\s+|is\s+)?(\d{4})").unwrap(),
        Regex::new(r"(?i)ending\s+in\s+(\d{4})").unwrap(),
        Regex::new(r"(?i)ends?\s+with\s+(\d{4})").unwrap(),
        Regex::new(r"(?i)account\s+\w+\s+(\d{4})").unwrap(),
    ];

    /// A standalone 4-digit group, not part of a longer digit run
    static ref BARE_FOUR_DIGITS: Regex = Regex::new(r"\b(\d{4})\b").unwrap();
}

/// Extract a 4-digit PIN from the message, preferring explicit phrasing.
pub fn extract_pin(message: &str) -> Option<String> {
    for pattern in PIN_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(message) {
            let pin = caps[1].to_string();
            debug!("Extracted PIN via explicit pattern");
            return Some(pin);
        }
    }

    let trimmed = message.trim();
    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        debug!("Extracted PIN from simple 4-digit message");
        return Some(trimmed.to_string());
    }

    BARE_FOUR_DIGITS
        .captures(message)
        .map(|caps| caps[1].to_string())
}

/// Extract the last 4 digits of an account number from the message.
/// Explicit phrasing ("ending in 1234", "last four digits 1234") takes
/// precedence over a bare 4-digit scan.
pub fn extract_last_4_digits(message: &str) -> Option<String> {
    for pattern in LAST_DIGIT_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(message) {
            let digits = caps[1].to_string();
            debug!(digits = digits.as_str(), "Extracted last 4 digits via explicit pattern");
            return Some(digits);
        }
    }

    BARE_FOUR_DIGITS
        .captures(message)
        .map(|caps| caps[1].to_string())
}

/// Whole-word, case-insensitive keyword matcher
pub struct KeywordMatcher {
    patterns: Vec<(String, Regex)>,
}

impl KeywordMatcher {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = keywords
            .into_iter()
            .map(|kw| {
                let keyword = kw.as_ref().to_string();
                let pattern =
                    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&keyword))).unwrap();
                (keyword, pattern)
            })
            .collect();
        Self { patterns }
    }

    /// Returns the matched keywords, empty when nothing matched
    pub fn matches(&self, text: &str) -> Vec<&str> {
        self.patterns
            .iter()
            .filter(|(_, pattern)| pattern.is_match(text))
            .map(|(keyword, _)| keyword.as_str())
            .collect()
    }

    pub fn contains_any(&self, text: &str) -> bool {
        self.patterns.iter().any(|(_, pattern)| pattern.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_pin_explicit_phrasing() {
        assert_eq!(extract_pin("my pin is 4321"), Some("4321".to_string()));
        assert_eq!(extract_pin("PIN: 9876"), Some("9876".to_string()));
        assert_eq!(extract_pin("the pin would be 1111"), Some("1111".to_string()));
    }

    #[test]
    fn test_extract_pin_bare_message() {
        assert_eq!(extract_pin("1234"), Some("1234".to_string()));
        assert_eq!(extract_pin("  5678  "), Some("5678".to_string()));
        assert_eq!(extract_pin("hello there"), None);
    }

    #[test]
    fn test_extract_pin_ignores_longer_digit_runs() {
        assert_eq!(extract_pin("1311002345678"), None);
    }

    #[test]
    fn test_extract_last_4_digits_explicit_wins_over_bare() {
        assert_eq!(
            extract_last_4_digits("9999 ending in 1234"),
            Some("1234".to_string())
        );
        assert_eq!(
            extract_last_4_digits("last four digits 5678"),
            Some("5678".to_string())
        );
        assert_eq!(
            extract_last_4_digits("it ends with 4567"),
            Some("4567".to_string())
        );
    }

    #[test]
    fn test_extract_last_4_digits_bare_fallback() {
        assert_eq!(extract_last_4_digits("try 6789 please"), Some("6789".to_string()));
        assert_eq!(extract_last_4_digits("no digits here"), None);
    }

    #[test]
    fn test_keyword_matcher_word_boundaries() {
        let matcher = KeywordMatcher::new(["loan", "credit card"]);
        assert!(matcher.contains_any("I want a loan today"));
        assert!(matcher.contains_any("about my Credit Card please"));
        assert!(!matcher.contains_any("loans are different words"));
        assert!(!matcher.contains_any("balance inquiry"));
    }

    #[test]
    fn test_keyword_matcher_reports_matches() {
        let matcher = KeywordMatcher::new(["loan", "mortgage"]);
        let matched = matcher.matches("a loan and a mortgage");
        assert_eq!(matched, vec!["loan", "mortgage"]);
    }
}

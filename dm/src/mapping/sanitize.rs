//! Character sanitization for literals, row values and identities

use unicode_normalization::UnicodeNormalization;

/// Characters removed from every literal and row value
pub const UNSAFE_CHARS: &[char] = &['<', '>', '"', '\'', '(', ')', ';', '=', '\n', '\r'];

/// Remove unsafe characters
pub fn strip_unsafe(input: &str) -> String {
    input.chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect()
}

/// NFC-normalize, then remove unsafe characters
///
/// Applied to every key and string value of a raw row, so map field names
/// match regardless of the source's composed/decomposed encoding.
pub fn normalize_text(input: &str) -> String {
    let composed: String = input.nfc().collect();
    strip_unsafe(&composed)
}

/// Sanitize the entity-name part of an id
///
/// Drops whitespace and unsafe characters and folds the accented vowels
/// that commonly appear in source names.
pub fn sanitize_identity(input: &str) -> String {
    input
        .nfc()
        .filter(|c| !c.is_whitespace() && !UNSAFE_CHARS.contains(c))
        .map(|c| match c {
            'à' => 'a',
            'ù' => 'u',
            'é' | 'è' => 'e',
            'ò' => 'o',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_unsafe() {
        assert_eq!(strip_unsafe("a<b>\"c'(d);e=f\ng"), "abcdefg");
        assert_eq!(strip_unsafe("P-"), "P-");
    }

    #[test]
    fn test_normalize_text_composes() {
        // "e" + combining acute accent becomes the single precomposed code point
        let decomposed = "caf\u{0065}\u{0301}";
        assert_eq!(normalize_text(decomposed), "caf\u{00e9}");
    }

    #[test]
    fn test_sanitize_identity() {
        assert_eq!(sanitize_identity("abc 123"), "abc123");
        assert_eq!(sanitize_identity("Città Università"), "CittaUniversita");
        assert_eq!(sanitize_identity("però è"), "peroe");
        assert_eq!(sanitize_identity("x;(y)"), "xy");
    }

    proptest! {
        #[test]
        fn prop_strip_unsafe_removes_all(input in ".*") {
            let out = strip_unsafe(&input);
            prop_assert!(!out.chars().any(|c| UNSAFE_CHARS.contains(&c)));
        }

        #[test]
        fn prop_sanitize_identity_has_no_whitespace(input in ".*") {
            let out = sanitize_identity(&input);
            prop_assert!(!out.chars().any(char::is_whitespace));
            prop_assert!(!out.chars().any(|c| UNSAFE_CHARS.contains(&c)));
        }

        #[test]
        fn prop_strip_unsafe_is_idempotent(input in ".*") {
            let once = strip_unsafe(&input);
            prop_assert_eq!(strip_unsafe(&once), once.clone());
        }
    }
}

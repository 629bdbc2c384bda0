use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Canonicalize a string for comparison: lower-case, strip diacritics,
/// collapse internal whitespace, trim.
///
/// Every textual comparison in the crate (matching, exclusion filters,
/// sender checks) goes through this function. Idempotent by construction:
/// the output contains only lower-case non-combining characters separated
/// by single spaces.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped: String = lowered
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a normalized string into words, dropping punctuation-only tokens.
/// Tokens like "c/2" keep their alphanumeric runs ("c", "2") so that
/// packaging noise does not poison word-set comparisons.
pub fn words(normalized: &str) -> Vec<String> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

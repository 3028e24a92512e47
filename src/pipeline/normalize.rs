//! Text normalisation: deterministic cleanup of OCR output.
//!
//! OCR engines emit text with layout whitespace (line breaks per scanned
//! line, runs of spaces between columns, trailing newlines). The embedding
//! models care about words, not layout, so every maximal whitespace run is
//! collapsed to a single space and the ends are trimmed. The zero-width
//! no-break space (U+FEFF, a stray byte-order mark in some OCR output)
//! counts as whitespace here even though Unicode does not classify it so.
//!
//! When nothing is left, [`NO_TEXT_SENTINEL`] is returned instead of `""`
//! so "nothing found" stays distinguishable from "not computed yet". The
//! sentinel must never reach an embedding call.

use once_cell::sync::Lazy;
use regex::Regex;

/// Reserved clean-text value meaning "no text found".
pub const NO_TEXT_SENTINEL: &str = "(No text found)";

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\x{FEFF}]+").unwrap());

/// Collapse whitespace runs, trim, and map empty results to the sentinel.
pub fn normalize(raw: &str) -> String {
    let collapsed = RE_WHITESPACE.replace_all(raw, " ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        NO_TEXT_SENTINEL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// True for the "no text found" sentinel.
pub fn is_sentinel(text: &str) -> bool {
    text == NO_TEXT_SENTINEL
}

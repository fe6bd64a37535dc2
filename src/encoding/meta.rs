//! `<meta>` charset scanning over a window of already-read body text.

use std::sync::LazyLock;

use encoding_rs::Encoding;
use regex::Regex;

use super::resolver::{extract_charset, normalize_declared};

/// Compiles a regex at static init; panics on invalid pattern.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Matches one complete `<meta ...>` tag, attributes spanning lines allowed.
static META_TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?is)<meta\b[^>]*>"));

/// Finds the charset declared by a `<meta>` tag in `window`.
///
/// Tags are visited from the end of the window backward, so the match
/// nearest the end wins. A tag whose `charset=` value names no known
/// encoding is skipped.
#[must_use]
pub fn find_meta_charset(window: &str) -> Option<&'static Encoding> {
    let tags: Vec<&str> = META_TAG_RE.find_iter(window).map(|m| m.as_str()).collect();
    tags.into_iter()
        .rev()
        .find_map(extract_charset)
        .map(normalize_declared)
}

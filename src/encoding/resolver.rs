//! Encoding name validation, `charset=` extraction and the final-encoding policy.
//!
//! Everything here is pure: no I/O, no allocation beyond small strings. The
//! streaming reader collects hints while it reads and hands them to
//! [`resolve_encoding`] once the bounded detection window closes.

use encoding_rs::{Encoding, REPLACEMENT, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1252};

use super::DetectionMode;

/// The encoding used when nothing else is configured (`ISO-8859-1`).
///
/// `encoding_rs` follows the WHATWG Encoding Standard, where the
/// `iso-8859-1` label names `windows-1252`, a strict superset.
#[must_use]
pub fn default_encoding() -> &'static Encoding {
    WINDOWS_1252
}

/// Attribute name searched for by [`extract_charset`].
const CHARSET_ATTRIBUTE: &str = "charset";

/// Where the final encoding for a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    /// The `charset=` parameter of the `Content-Type` response header.
    Header,
    /// A `<meta>` tag found in the first chunks of the body.
    MetaTag,
    /// The statistical detector, either locked in or as a best guess.
    Detector,
    /// The session's configured fallback encoding.
    Fallback,
    /// Detection disabled; the configured encoding was used as-is.
    Fixed,
}

/// The single encoding chosen for one response, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingDecision {
    /// Encoding used to decode the body.
    pub encoding: &'static Encoding,
    /// Signal that produced it.
    pub source: EncodingSource,
}

impl EncodingDecision {
    #[must_use]
    pub fn new(encoding: &'static Encoding, source: EncodingSource) -> Self {
        Self { encoding, source }
    }

    /// Canonical WHATWG name of the chosen encoding.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

/// Signals gathered during one read, consumed by [`resolve_encoding`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodingHints {
    /// Charset named by the `Content-Type` header, if valid.
    pub header: Option<&'static Encoding>,
    /// First charset found in a `<meta>` tag, if any.
    pub meta: Option<&'static Encoding>,
    /// Detector best guess regardless of confidence; `None` when the body
    /// looked like plain ASCII or the detector was never consulted.
    pub detector: Option<&'static Encoding>,
}

/// Resolves an encoding label to an encoding the decoder supports.
///
/// `ascii` is read as `ISO-8859-1`, which decodes every byte instead of
/// failing on stray high-bit characters. Unknown labels and the WHATWG
/// `replacement` pseudo-encoding resolve to `None`.
#[must_use]
pub fn lookup_encoding(name: &str) -> Option<&'static Encoding> {
    let label = name.trim().trim_matches(|c| c == '"' || c == '\'');
    if label.is_empty() {
        return None;
    }
    let label = if label.eq_ignore_ascii_case("ascii") || label.eq_ignore_ascii_case("us-ascii") {
        "iso-8859-1"
    } else {
        label
    };
    Encoding::for_label(label.as_bytes()).filter(|encoding| *encoding != REPLACEMENT)
}

/// Extracts a known encoding from a `charset=` attribute inside `raw`.
///
/// The attribute name is matched case-insensitively. The value starts at the
/// first non-quote character after `=` and ends at the next quote,
/// semicolon, comma, whitespace, `>` or `/`. Every occurrence is tried in
/// order; a token that names no known encoding counts as absent.
#[must_use]
pub fn extract_charset(raw: &str) -> Option<&'static Encoding> {
    let lowered = raw.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(relative) = lowered[search_from..].find(CHARSET_ATTRIBUTE) {
        let after_name = search_from + relative + CHARSET_ATTRIBUTE.len();
        search_from = after_name;

        let rest = raw[after_name..].trim_start();
        let Some(value) = rest.strip_prefix('=') else {
            continue;
        };
        let value = value.trim_start_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
        let end = value
            .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ';' | ',' | '>' | '/'))
            .unwrap_or(value.len());

        if let Some(encoding) = lookup_encoding(&value[..end]) {
            return Some(encoding);
        }
    }

    None
}

/// Extracts the charset named by a `Content-Type` header value.
#[must_use]
pub fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    extract_charset(content_type)
}

/// Normalizes a charset declared inside the document itself.
///
/// A page that could be scanned as ASCII-compatible text cannot really be
/// UTF-16, so such declarations are read as UTF-8.
#[must_use]
pub fn normalize_declared(encoding: &'static Encoding) -> &'static Encoding {
    if encoding == UTF_16LE || encoding == UTF_16BE {
        UTF_8
    } else {
        encoding
    }
}

/// Returns the encoding locked in before any body byte is read, if any.
///
/// `Fixed` always locks the configured encoding. `Auto` and `MetaTag` lock a
/// valid `Content-Type` charset; `ForceStatistical` never consults the header
/// up front.
#[must_use]
pub fn preselect_encoding(
    mode: DetectionMode,
    header: Option<&'static Encoding>,
    configured: &'static Encoding,
) -> Option<EncodingDecision> {
    match mode {
        DetectionMode::Fixed => Some(EncodingDecision::new(configured, EncodingSource::Fixed)),
        DetectionMode::Auto | DetectionMode::MetaTag => {
            header.map(|encoding| EncodingDecision::new(encoding, EncodingSource::Header))
        }
        DetectionMode::ForceStatistical => None,
    }
}

/// Picks the final encoding once detection ended without a lock.
///
/// Priority: meta tag, then the detector's best guess at any confidence,
/// then the header charset, then `fallback`. Signals the mode does not
/// consult are ignored.
#[must_use]
pub fn resolve_encoding(
    mode: DetectionMode,
    hints: EncodingHints,
    fallback: &'static Encoding,
) -> EncodingDecision {
    if mode == DetectionMode::Fixed {
        return EncodingDecision::new(fallback, EncodingSource::Fixed);
    }

    let detector = if mode.uses_detector() { hints.detector } else { None };
    let meta = if mode.uses_meta_tags() { hints.meta } else { None };

    meta.map(|encoding| EncodingDecision::new(encoding, EncodingSource::MetaTag))
        .or_else(|| detector.map(|encoding| EncodingDecision::new(encoding, EncodingSource::Detector)))
        .or_else(|| {
            hints
                .header
                .map(|encoding| EncodingDecision::new(encoding, EncodingSource::Header))
        })
        .unwrap_or_else(|| EncodingDecision::new(fallback, EncodingSource::Fallback))
}

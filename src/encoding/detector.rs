//! Statistical charset detection over raw body chunks.
//!
//! The reader only needs a black box that can be fed chunks and asked for a
//! verdict, so detection sits behind the [`CharsetDetector`] trait. The
//! default [`StatisticalDetector`] is backed by `chardetng`, which reports a
//! best guess but no score; confidence is derived from how much non-ASCII
//! evidence the guess rests on.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

/// Confidence above which a detector verdict locks the encoding.
pub const CONFIDENCE_THRESHOLD: f32 = 0.49;

/// Confidence assigned to a UTF-8 guess: the bytes seen so far were valid
/// UTF-8 and contained multi-byte sequences.
const UTF8_CONFIDENCE: f32 = 0.99;

/// Non-ASCII byte count at which a legacy-encoding guess reaches 0.5.
const LEGACY_EVIDENCE_HALF: f32 = 32.0;

/// A detector's current opinion about the bytes it has been fed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorVerdict {
    /// Best-guess encoding.
    pub encoding: &'static Encoding,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// The detector will not change its mind with more input.
    pub done: bool,
}

impl DetectorVerdict {
    /// Whether this verdict is strong enough to lock the encoding.
    #[must_use]
    pub fn is_conclusive(&self) -> bool {
        self.done || self.confidence > CONFIDENCE_THRESHOLD
    }
}

/// Capability consumed by the streaming reader.
pub trait CharsetDetector: Send {
    /// Feeds the next chunk of raw body bytes.
    fn feed(&mut self, chunk: &[u8]);

    /// Current verdict, or `None` while everything fed so far is ASCII.
    fn verdict(&self) -> Option<DetectorVerdict>;
}

/// `chardetng`-backed detector.
pub struct StatisticalDetector {
    inner: EncodingDetector,
    tld: Option<Vec<u8>>,
    non_ascii_bytes: usize,
}

impl StatisticalDetector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: EncodingDetector::new(),
            tld: None,
            non_ascii_bytes: 0,
        }
    }

    /// Creates a detector hinted with the top-level domain of `host`.
    ///
    /// Hosts without an alphabetic TLD (IP literals, `localhost`) get no hint.
    #[must_use]
    pub fn for_host(host: Option<&str>) -> Self {
        let mut detector = Self::new();
        detector.tld = host.and_then(tld_hint);
        detector
    }
}

impl Default for StatisticalDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatisticalDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticalDetector")
            .field("tld", &self.tld.as_deref().map(String::from_utf8_lossy))
            .field("non_ascii_bytes", &self.non_ascii_bytes)
            .finish_non_exhaustive()
    }
}

impl CharsetDetector for StatisticalDetector {
    fn feed(&mut self, chunk: &[u8]) {
        self.non_ascii_bytes += chunk.iter().filter(|byte| !byte.is_ascii()).count();
        self.inner.feed(chunk, false);
    }

    /// Reports chardetng's guess with a confidence of our own making.
    ///
    /// chardetng exposes no score. A UTF-8 guess gets a fixed high confidence.
    /// Any other guess gets the evidence curve `n / (n + 32)` over the `n`
    /// non-ASCII bytes seen, so 32 such bytes make a conclusive verdict.
    fn verdict(&self) -> Option<DetectorVerdict> {
        if self.non_ascii_bytes == 0 {
            return None;
        }

        let encoding = self.inner.guess(self.tld.as_deref(), true);
        let confidence = if encoding == UTF_8 {
            UTF8_CONFIDENCE
        } else {
            legacy_confidence(self.non_ascii_bytes)
        };

        Some(DetectorVerdict {
            encoding,
            confidence,
            done: false,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn legacy_confidence(non_ascii_bytes: usize) -> f32 {
    let evidence = non_ascii_bytes as f32;
    evidence / (evidence + LEGACY_EVIDENCE_HALF)
}

fn tld_hint(host: &str) -> Option<Vec<u8>> {
    let label = host.trim_end_matches('.').rsplit('.').next()?;
    let label = label.to_ascii_lowercase();
    let is_domain_label = label.len() >= 2 && label.bytes().all(|b| b.is_ascii_lowercase());
    (is_domain_label && host.contains('.')).then(|| label.into_bytes())
}

//! Character-encoding detection for response bodies.
//!
//! Three signals are combined to choose how a body is decoded:
//!
//! - the `charset=` parameter of the `Content-Type` header ([`resolver`])
//! - `<meta>` charset declarations in the first chunks of the body ([`meta`])
//! - a statistical guess over the raw bytes ([`detector`])
//!
//! Which signals are consulted, and in what order, is governed by a
//! [`DetectionMode`]. The policy itself lives in
//! [`resolver::resolve_encoding`] and is free of I/O.

pub mod detector;
pub mod meta;
pub mod resolver;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use detector::{CharsetDetector, DetectorVerdict, StatisticalDetector};
pub use meta::find_meta_charset;
pub use resolver::{
    EncodingDecision, EncodingHints, EncodingSource, default_encoding, extract_charset,
    lookup_encoding, resolve_encoding,
};

/// Policy selecting which encoding signals are consulted for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    /// Header charset first; otherwise the statistical detector, with
    /// `<meta>` tags scanned concurrently as a fallback.
    #[default]
    Auto,
    /// Header charset first; otherwise the first `<meta>` charset wins.
    MetaTag,
    /// Always decode with the session's configured encoding.
    Fixed,
    /// Detector and `<meta>` tags first; the header is only a late hint.
    ForceStatistical,
}

impl DetectionMode {
    /// Whether raw chunks are fed to the statistical detector.
    #[must_use]
    pub fn uses_detector(self) -> bool {
        matches!(self, Self::Auto | Self::ForceStatistical)
    }

    /// Whether chunks are scanned for `<meta>` charset declarations.
    #[must_use]
    pub fn uses_meta_tags(self) -> bool {
        !matches!(self, Self::Fixed)
    }

    /// Whether a `<meta>` charset locks the encoding as soon as it is seen.
    #[must_use]
    pub fn meta_tag_is_final(self) -> bool {
        matches!(self, Self::MetaTag)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::MetaTag => "meta-tag",
            Self::Fixed => "fixed",
            Self::ForceStatistical => "force-statistical",
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "statistical" => Ok(Self::Auto),
            "meta-tag" | "meta" => Ok(Self::MetaTag),
            "fixed" | "default" => Ok(Self::Fixed),
            "force-statistical" | "force" => Ok(Self::ForceStatistical),
            other => Err(format!(
                "unknown detection mode '{other}' (expected auto, meta-tag, fixed, force-statistical)"
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_mode_signal_matrix() {
        assert!(DetectionMode::Auto.uses_detector());
        assert!(DetectionMode::Auto.uses_meta_tags());
        assert!(!DetectionMode::Auto.meta_tag_is_final());

        assert!(!DetectionMode::MetaTag.uses_detector());
        assert!(DetectionMode::MetaTag.uses_meta_tags());
        assert!(DetectionMode::MetaTag.meta_tag_is_final());

        assert!(!DetectionMode::Fixed.uses_detector());
        assert!(!DetectionMode::Fixed.uses_meta_tags());

        assert!(DetectionMode::ForceStatistical.uses_detector());
        assert!(DetectionMode::ForceStatistical.uses_meta_tags());
    }

    #[test]
    fn test_detection_mode_parses_aliases() {
        assert_eq!("auto".parse::<DetectionMode>(), Ok(DetectionMode::Auto));
        assert_eq!("META".parse::<DetectionMode>(), Ok(DetectionMode::MetaTag));
        assert_eq!("fixed".parse::<DetectionMode>(), Ok(DetectionMode::Fixed));
        assert_eq!(
            "force-statistical".parse::<DetectionMode>(),
            Ok(DetectionMode::ForceStatistical)
        );
        assert!("sometimes".parse::<DetectionMode>().is_err());
    }

    #[test]
    fn test_detection_mode_display_round_trips_through_parse() {
        for mode in [
            DetectionMode::Auto,
            DetectionMode::MetaTag,
            DetectionMode::Fixed,
            DetectionMode::ForceStatistical,
        ] {
            assert_eq!(mode.to_string().parse::<DetectionMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_detection_mode_serde_uses_kebab_case() {
        let json = serde_json::to_string(&DetectionMode::ForceStatistical).unwrap();
        assert_eq!(json, "\"force-statistical\"");
        let mode: DetectionMode = serde_json::from_str("\"meta-tag\"").unwrap();
        assert_eq!(mode, DetectionMode::MetaTag);
    }
}

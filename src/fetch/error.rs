//! Error types for the fetch module.
//!
//! Every variant carries the context (URL, path) needed to produce a useful
//! last-error message on the session.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be built: empty or malformed URL, or a
    /// transport client that failed to construct.
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration.
        message: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The transport or the operation-timeout ceiling expired.
    #[error("timeout fetching {url} after {elapsed_ms} ms")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// Milliseconds spent before giving up.
        elapsed_ms: u128,
    },

    /// The response carried no body bytes at all.
    #[error("empty response body from {url} (HTTP {status})")]
    EmptyBody {
        /// The URL that returned nothing.
        url: String,
        /// The HTTP status code of the empty response.
        status: u16,
    },

    /// Reading a configuration file failed.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file was not valid JSON for [`SessionConfig`](super::SessionConfig).
    #[error("invalid config file {path}: {source}")]
    InvalidConfig {
        /// The offending file.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates the error for a missing or blank URL.
    #[must_use]
    pub fn empty_url() -> Self {
        Self::configuration("URL is empty")
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Classifies a transport failure, promoting reqwest timeouts to [`FetchError::Timeout`].
    pub fn transport(url: impl Into<String>, source: reqwest::Error, elapsed: Duration) -> Self {
        if source.is_timeout() {
            Self::timeout(url, elapsed.as_millis())
        } else {
            Self::network(url, source)
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>, elapsed_ms: u128) -> Self {
        Self::Timeout {
            url: url.into(),
            elapsed_ms,
        }
    }

    /// Creates an empty-body error.
    pub fn empty_body(url: impl Into<String>, status: u16) -> Self {
        Self::EmptyBody {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid-config error.
    pub fn invalid_config(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::InvalidConfig {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a timeout of either kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the URL
// or path, which the source errors do not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_empty_url_display() {
        let msg = FetchError::empty_url().to_string();
        assert!(msg.contains("configuration"), "Expected kind in: {msg}");
        assert!(msg.contains("URL is empty"), "Expected reason in: {msg}");
    }

    #[test]
    fn test_fetch_error_timeout_display() {
        let error = FetchError::timeout("http://example.test/slow", 51);
        let msg = error.to_string();
        assert!(msg.contains("timeout"), "Expected 'timeout' in: {msg}");
        assert!(msg.contains("http://example.test/slow"), "Expected URL in: {msg}");
        assert!(msg.contains("51 ms"), "Expected elapsed in: {msg}");
        assert!(error.is_timeout());
    }

    #[test]
    fn test_fetch_error_empty_body_display() {
        let error = FetchError::empty_body("http://example.test/", 204);
        let msg = error.to_string();
        assert!(msg.contains("204"), "Expected status in: {msg}");
        assert!(!error.is_timeout());
    }

    #[test]
    fn test_fetch_error_invalid_config_display() {
        let source = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = FetchError::invalid_config("/tmp/session.json", source);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/session.json"), "Expected path in: {msg}");
    }

    #[test]
    fn test_fetch_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let msg = FetchError::io("/tmp/none.json", io_error).to_string();
        assert!(msg.contains("/tmp/none.json"), "Expected path in: {msg}");
    }
}

//! Serializable session configuration.
//!
//! [`SessionConfig`] mirrors the request-shaping knobs of a
//! [`Session`](super::Session) in a form that can be read from a JSON file.
//! Missing fields take the session defaults.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::FetchError;
use super::constants::{
    CONNECT_TIMEOUT, DEFAULT_ACCEPT, DEFAULT_BUFFER_SIZE, DEFAULT_CONNECTION_LIMIT,
    DEFAULT_CONTENT_TYPE, READ_TIMEOUT,
};
use crate::encoding::DetectionMode;
use crate::user_agent;

/// File-loadable session settings. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `Host` header override.
    pub host: Option<String>,
    pub user_agent: String,
    pub accept: String,
    /// `Content-Type` sent with request bodies.
    pub content_type: String,
    pub referer: Option<String>,
    pub origin: Option<String>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Proxy URL, e.g. `http://proxy.local:3128`.
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    /// Basic-auth username sent to the target server.
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Wall-clock ceiling on reading one body; `None` is unbounded.
    pub operation_timeout_ms: Option<u64>,
    pub auto_redirect: bool,
    pub gzip: bool,
    pub deflate: bool,
    pub keep_alive: bool,
    /// Idle connections kept per host.
    pub connection_limit: usize,
    /// Accept any server certificate.
    pub trust_all_certificates: bool,
    /// Chunk size for body reads, in bytes.
    pub buffer_size: usize,
    /// Byte cap on response bodies; `None` is unbounded.
    pub max_response_size: Option<u64>,
    /// Request body encoding and decoding fallback, as an encoding label.
    pub encoding: String,
    pub detection_mode: DetectionMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: None,
            user_agent: user_agent::default_user_agent(),
            accept: DEFAULT_ACCEPT.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            referer: None,
            origin: None,
            headers: BTreeMap::new(),
            proxy: None,
            proxy_username: None,
            proxy_password: None,
            username: None,
            password: None,
            connect_timeout_ms: duration_ms(CONNECT_TIMEOUT),
            read_timeout_ms: duration_ms(READ_TIMEOUT),
            operation_timeout_ms: None,
            auto_redirect: true,
            gzip: true,
            deflate: true,
            keep_alive: true,
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            trust_all_certificates: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_response_size: None,
            encoding: "ISO-8859-1".to_string(),
            detection_mode: DetectionMode::Auto,
        }
    }
}

impl SessionConfig {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidConfig`] when the text is not a valid
    /// configuration document.
    pub fn from_json(text: &str, origin: &Path) -> Result<Self, FetchError> {
        serde_json::from_str(text).map_err(|e| FetchError::invalid_config(origin, e))
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] if the file cannot be read and
    /// [`FetchError::InvalidConfig`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self, FetchError> {
        let text = std::fs::read_to_string(path).map_err(|e| FetchError::io(path, e))?;
        let config = Self::from_json(&text, path)?;
        debug!(path = %path.display(), "loaded session config");
        Ok(config)
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.content_type, "application/x-www-form-urlencoded");
        assert_eq!(config.connect_timeout_ms, 8000);
        assert_eq!(config.read_timeout_ms, 8000);
        assert_eq!(config.operation_timeout_ms, None);
        assert!(config.auto_redirect);
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.max_response_size, None);
        assert_eq!(config.encoding, "ISO-8859-1");
        assert_eq!(config.detection_mode, DetectionMode::Auto);
        assert!(config.user_agent.starts_with("pagefetch/"));
    }

    #[test]
    fn test_session_config_partial_json_keeps_defaults() {
        let json = r#"{ "buffer_size": 1024, "detection_mode": "meta-tag", "headers": { "X-Trace": "1" } }"#;
        let config = SessionConfig::from_json(json, Path::new("inline")).unwrap();
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.detection_mode, DetectionMode::MetaTag);
        assert_eq!(config.headers.get("X-Trace").map(String::as_str), Some("1"));
        assert_eq!(config.connect_timeout_ms, 8000);
    }

    #[test]
    fn test_session_config_invalid_json_is_error() {
        let result = SessionConfig::from_json("{ buffer_size: ", Path::new("broken.json"));
        assert!(matches!(result, Err(FetchError::InvalidConfig { .. })));
    }

    #[test]
    fn test_session_config_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.json");
        std::fs::write(&path, r#"{ "max_response_size": 4096, "operation_timeout_ms": 250 }"#)
            .unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.max_response_size, Some(4096));
        assert_eq!(config.operation_timeout_ms, Some(250));
    }

    #[test]
    fn test_session_config_load_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let result = SessionConfig::load(&temp.path().join("absent.json"));
        assert!(matches!(result, Err(FetchError::Io { .. })));
    }
}

//! Constants for the fetch module (timeouts, buffer sizing, detection window).

use std::time::Duration;

/// Default HTTP connect timeout (8 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(8000);

/// Default HTTP read timeout between body bytes (8 seconds).
pub const READ_TIMEOUT: Duration = Duration::from_millis(8000);

/// Default chunk size for body reads (8 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Upper bound of the text-buffer capacity hint derived from `Content-Length`.
pub const MAX_CAPACITY_HINT: usize = 2 * 1024 * 1024;

/// Maximum chunks read while no encoding is locked in.
pub const MAX_DETECTION_CHUNKS: usize = 10;

/// Detection window once a `<meta>` charset has been tentatively found.
pub const META_GRACE_CHUNKS: usize = 3;

/// Default idle connections kept per host.
pub const DEFAULT_CONNECTION_LIMIT: usize = 10;

/// Transport-level redirect limit when auto-redirect is enabled.
pub const MAX_AUTO_REDIRECTS: usize = 10;

/// Safety valve for manual redirect-chain resolution.
pub const MAX_REDIRECT_HOPS: usize = 1000;

/// Default request `Content-Type` for bodies.
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Default `Accept` header.
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Status codes treated as redirects (moved, found, see-other, temporary, permanent).
pub const REDIRECT_STATUS_CODES: &[u16] = &[301, 302, 303, 307, 308];

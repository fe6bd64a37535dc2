//! Redirect detection and manual redirect-chain resolution.

use std::collections::HashSet;

use reqwest::{Method, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use super::FetchError;
use super::constants::{MAX_REDIRECT_HOPS, REDIRECT_STATUS_CODES};
use super::reader::ResponseHead;
use super::session::{Session, parse_url};

/// Whether `status` is one of the followed redirect codes.
#[must_use]
pub fn is_redirect_status(status: StatusCode) -> bool {
    REDIRECT_STATUS_CODES.contains(&status.as_u16())
}

/// Turns a `Location` header value into an absolute URL.
///
/// - a value containing `://` is already absolute
/// - `//host/path` takes the scheme of `current`
/// - `www.host/path` takes the scheme of `current`
/// - anything else is appended to `current` after a `/`; one leading `/`
///   of the location is dropped, so the result is always below `current`
#[must_use]
pub fn absolute_location(current: &str, location: &str) -> String {
    let location = location.trim();
    if location.contains("://") {
        return location.to_string();
    }

    let scheme = scheme_of(current);
    if let Some(rest) = location.strip_prefix("//") {
        return format!("{scheme}://{rest}");
    }
    if location.get(..4).is_some_and(|prefix| prefix.eq_ignore_ascii_case("www.")) {
        return format!("{scheme}://{location}");
    }

    let mut joined = current.to_string();
    if !joined.ends_with('/') {
        joined.push('/');
    }
    joined.push_str(location.strip_prefix('/').unwrap_or(location));
    joined
}

/// Compares two URLs after normalization (case of scheme/host, empty path).
#[must_use]
pub fn same_url(left: &str, right: &str) -> bool {
    canonical_url(left) == canonical_url(right)
}

fn canonical_url(raw: &str) -> String {
    Url::parse(raw.trim()).map_or_else(|_| raw.trim().to_string(), String::from)
}

fn scheme_of(url: &str) -> String {
    Url::parse(url).map_or_else(
        |_| {
            url.split_once("://")
                .map_or_else(|| "http".to_string(), |(scheme, _)| scheme.to_ascii_lowercase())
        },
        |parsed| parsed.scheme().to_string(),
    )
}

impl Session {
    /// Follows a redirect chain with `HEAD` probes and returns its end.
    ///
    /// Auto-redirect is disabled for the probes. The chain ends at the first
    /// non-redirect response or at a redirect without a `Location` header.
    /// A cycle, or a chain longer than 1000 hops, yields an empty string.
    ///
    /// # Errors
    ///
    /// [`FetchError::Configuration`] for an empty or malformed URL, and
    /// transport errors from any probe. Errors are also recorded in
    /// [`last_error`](Self::last_error).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn resolve_redirect_chain(&mut self, url: &str) -> Result<String, FetchError> {
        self.begin_call();
        let result = self.follow_chain(url).await;
        self.record_outcome(result)
    }

    async fn follow_chain(&mut self, url: &str) -> Result<String, FetchError> {
        parse_url(url)?;
        let mut current = url.trim().to_string();
        let mut visited = HashSet::from([canonical_url(&current)]);
        let mut last_location = None;

        for hop in 0..MAX_REDIRECT_HOPS {
            let response = self.send(Method::HEAD, &current, None, false).await?;
            let head = ResponseHead::from_response(&response);
            drop(response);

            let next = match (is_redirect_status(head.status), head.location) {
                (true, Some(location)) => absolute_location(&current, &location),
                _ => {
                    self.last_redirect_location = last_location;
                    return Ok(current);
                }
            };
            debug!(hop, from = %current, to = %next, status = head.status.as_u16(), "redirect");

            last_location = Some(next.clone());
            if !visited.insert(canonical_url(&next)) {
                warn!(url = %next, "redirect cycle detected");
                self.last_redirect_location = last_location;
                return Ok(String::new());
            }
            current = next;
        }

        warn!(hops = MAX_REDIRECT_HOPS, "redirect chain too long");
        self.last_redirect_location = last_location;
        Ok(String::new())
    }
}

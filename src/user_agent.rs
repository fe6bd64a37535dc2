//! Default User-Agent string for session requests.

/// Default User-Agent (identifies the tool and its version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("pagefetch/{version} (charset-aware-fetcher)")
}

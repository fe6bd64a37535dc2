//! Request construction on top of reqwest.
//!
//! Each call builds a fresh [`Client`] from the session snapshot so that
//! setting changes between calls always take effect; the cookie jar is the
//! only piece shared across clients.

use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, CONNECTION, CONTENT_TYPE, HOST, ORIGIN, REFERER, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Method, Proxy, RequestBuilder};
use tracing::{debug, warn};

use super::FetchError;
use super::constants::MAX_AUTO_REDIRECTS;
use super::session::{Decompression, ProxySettings, Session, parse_url};

/// Client-level settings copied out of a session for one build.
#[derive(Debug, Clone)]
struct ClientSettings {
    cookie_jar: Arc<Jar>,
    connect_timeout: Duration,
    read_timeout: Duration,
    follow_redirects: bool,
    decompression: Decompression,
    keep_alive: bool,
    connection_limit: usize,
    trust_all_certificates: bool,
    proxy: Option<ProxySettings>,
}

impl Session {
    /// Builds a request honoring the session's auto-redirect setting.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Configuration`] for an empty or malformed URL,
    /// an unusable proxy, or a client that fails to build.
    pub fn build_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<RequestBuilder, FetchError> {
        self.build_request_with(method, url, body, self.auto_redirect)
    }

    /// Builds a request with an explicit redirect policy.
    ///
    /// # Errors
    ///
    /// See [`build_request`](Self::build_request).
    pub fn build_request_with(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
        follow_redirects: bool,
    ) -> Result<RequestBuilder, FetchError> {
        let target = parse_url(url)?;
        let client = build_client(self.client_settings(follow_redirects))?;

        let mut request = client
            .request(method, target)
            .header(USER_AGENT, self.user_agent.as_str())
            .header(ACCEPT, self.accept.as_str());
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer.as_str());
        }
        if let Some(origin) = &self.origin {
            request = request.header(ORIGIN, origin.as_str());
        }
        if let Some(host) = &self.host {
            request = request.header(HOST, host.as_str());
        }
        if !self.keep_alive {
            request = request.header(CONNECTION, "close");
        }
        request = request.headers(self.headers.clone());
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        if let Some(body) = body {
            let (bytes, used, lossy) = self.encoding.encode(body);
            if lossy {
                debug!(encoding = used.name(), "request body had unmappable characters");
            }
            request = request
                .header(CONTENT_TYPE, self.content_type.as_str())
                .body(bytes.into_owned());
        }
        Ok(request)
    }

    fn client_settings(&self, follow_redirects: bool) -> ClientSettings {
        ClientSettings {
            cookie_jar: Arc::clone(&self.cookie_jar),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            follow_redirects,
            decompression: self.decompression,
            keep_alive: self.keep_alive,
            connection_limit: self.connection_limit,
            trust_all_certificates: self.trust_all_certificates,
            proxy: self.proxy.clone(),
        }
    }
}

fn build_client(settings: ClientSettings) -> Result<Client, FetchError> {
    let initial = try_build_client(settings.clone(), false);
    match initial {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!(
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            match try_build_client(settings, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Build(error)) => Err(error),
                Err(BuildClientFailure::Panic) => Err(FetchError::configuration(
                    "HTTP client builder panicked while applying env-proxy fallback",
                )),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(error),
    }
}

enum BuildClientFailure {
    Panic,
    Build(FetchError),
}

// `catch_unwind` does not suppress panic-hook stderr output, so the hook is
// silenced while a guarded build runs.
static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    settings: ClientSettings,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        #[cfg(test)]
        maybe_inject_client_build_panic(disable_system_proxy_lookup);

        let mut builder = base_client_builder(&settings)?;
        if disable_system_proxy_lookup && settings.proxy.is_none() {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder
            .build()
            .map_err(|e| BuildClientFailure::Build(FetchError::configuration(format!(
                "failed to build HTTP client: {e}"
            ))))
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _panic_hook_guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn base_client_builder(settings: &ClientSettings) -> Result<ClientBuilder, BuildClientFailure> {
    let redirect = if settings.follow_redirects {
        Policy::limited(MAX_AUTO_REDIRECTS)
    } else {
        Policy::none()
    };
    let idle_per_host = if settings.keep_alive {
        settings.connection_limit
    } else {
        0
    };

    let mut builder = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_timeout)
        .redirect(redirect)
        .gzip(settings.decompression.gzip)
        .deflate(settings.decompression.deflate)
        .pool_max_idle_per_host(idle_per_host)
        .danger_accept_invalid_certs(settings.trust_all_certificates)
        .cookie_provider(Arc::clone(&settings.cookie_jar));

    if let Some(proxy) = &settings.proxy {
        let mut resolved = Proxy::all(proxy.url.as_str()).map_err(|e| {
            BuildClientFailure::Build(FetchError::configuration(format!(
                "invalid proxy '{}': {e}",
                proxy.url
            )))
        })?;
        if let Some(credentials) = &proxy.credentials {
            resolved = resolved.basic_auth(
                &credentials.username,
                credentials.password.as_deref().unwrap_or_default(),
            );
        }
        builder = builder.proxy(resolved);
    }
    Ok(builder)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Headers a request would carry, for tests.
#[cfg(test)]
fn request_headers(request: RequestBuilder) -> reqwest::header::HeaderMap {
    request
        .build()
        .map(|built| built.headers().clone())
        .unwrap_or_default()
}

#[cfg(test)]
static CLIENT_BUILD_PANIC_INJECTION_COUNT: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
fn inject_client_build_panics(count: usize) {
    CLIENT_BUILD_PANIC_INJECTION_COUNT.store(count, std::sync::atomic::Ordering::SeqCst);
}

#[cfg(test)]
fn maybe_inject_client_build_panic(disable_system_proxy_lookup: bool) {
    use std::sync::atomic::Ordering;

    if disable_system_proxy_lookup {
        return;
    }

    if CLIENT_BUILD_PANIC_INJECTION_COUNT
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            if count > 0 { Some(count - 1) } else { None }
        })
        .is_ok()
    {
        panic!("injected HTTP client builder panic");
    }
}

//! The long-lived fetch session and its verb methods.
//!
//! A [`Session`] carries everything that survives between requests (cookie
//! jar, headers, proxy, timeouts, detection mode) plus the results of the
//! last call. Per-call scratch state (retained raw chunks, decode buffers)
//! lives on the stack of the call that uses it, and every verb takes
//! `&mut self`, so a session runs one operation at a time by construction.
//!
//! # Example
//!
//! ```no_run
//! use pagefetch_core::{DetectionMode, Session};
//!
//! # async fn example() -> Result<(), pagefetch_core::FetchError> {
//! let mut session = Session::new();
//! session.set_detection_mode(DetectionMode::MetaTag);
//! let page = session.get("https://example.com/").await?;
//! println!("{} ({})", page.status, page.encoding.name());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use encoding_rs::Encoding;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::FetchError;
use super::config::SessionConfig;
use super::constants::{
    CONNECT_TIMEOUT, DEFAULT_ACCEPT, DEFAULT_BUFFER_SIZE, DEFAULT_CONNECTION_LIMIT,
    DEFAULT_CONTENT_TYPE, READ_TIMEOUT,
};
use super::reader::{self, ReadOptions, ResponseHead};
use crate::encoding::{
    DetectionMode, EncodingDecision, StatisticalDetector, default_encoding, lookup_encoding,
};
use crate::user_agent;

/// Username and optional password for basic authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// Proxy used for every request of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub url: String,
    pub credentials: Option<Credentials>,
}

/// Response decompression the transport negotiates and applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decompression {
    pub gzip: bool,
    pub deflate: bool,
}

impl Default for Decompression {
    fn default() -> Self {
        Self {
            gzip: true,
            deflate: true,
        }
    }
}

/// Decoded result of a text fetch.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Decoded body text (possibly cut at the byte cap).
    pub text: String,
    pub status: StatusCode,
    /// URL of the response after any transport-level redirects.
    pub url: String,
    /// Encoding the body was decoded with, and its source.
    pub encoding: EncodingDecision,
    /// Absolute redirect target, when the response was a redirect or the
    /// transport followed one.
    pub redirect_location: Option<String>,
    /// Raw body bytes consumed.
    pub bytes_read: u64,
    /// Reading stopped at the byte cap.
    pub truncated: bool,
}

/// Mutable, long-lived request configuration plus last-call results.
#[derive(Debug)]
pub struct Session {
    pub(super) host: Option<String>,
    pub(super) user_agent: String,
    pub(super) accept: String,
    pub(super) content_type: String,
    pub(super) referer: Option<String>,
    pub(super) origin: Option<String>,
    pub(super) headers: HeaderMap,
    pub(super) cookie_jar: Arc<Jar>,
    pub(super) proxy: Option<ProxySettings>,
    pub(super) credentials: Option<Credentials>,
    pub(super) connect_timeout: Duration,
    pub(super) read_timeout: Duration,
    pub(super) operation_timeout: Option<Duration>,
    pub(super) auto_redirect: bool,
    pub(super) decompression: Decompression,
    pub(super) keep_alive: bool,
    pub(super) connection_limit: usize,
    pub(super) trust_all_certificates: bool,
    pub(super) buffer_size: usize,
    pub(super) max_response_size: Option<u64>,
    pub(super) encoding: &'static Encoding,
    pub(super) detection_mode: DetectionMode,
    pub(super) last_error: String,
    pub(super) last_status: Option<StatusCode>,
    pub(super) last_redirect_location: Option<String>,
    pub(super) last_request_url: Option<String>,
    pub(super) last_encoding: Option<EncodingDecision>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates a session with default settings.
    ///
    /// Defaults: 8 s connect and read timeouts, no operation timeout,
    /// auto-redirect on, gzip and deflate on, 8 KiB chunks, no size cap,
    /// `ISO-8859-1` fallback encoding, [`DetectionMode::Auto`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: None,
            user_agent: user_agent::default_user_agent(),
            accept: DEFAULT_ACCEPT.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            referer: None,
            origin: None,
            headers: HeaderMap::new(),
            cookie_jar: Arc::new(Jar::default()),
            proxy: None,
            credentials: None,
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            operation_timeout: None,
            auto_redirect: true,
            decompression: Decompression::default(),
            keep_alive: true,
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            trust_all_certificates: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_response_size: None,
            encoding: default_encoding(),
            detection_mode: DetectionMode::Auto,
            last_error: String::new(),
            last_status: None,
            last_redirect_location: None,
            last_request_url: None,
            last_encoding: None,
        }
    }

    /// Creates a session from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Configuration`] when a configured header name or
    /// value is not valid HTTP.
    pub fn from_config(config: &SessionConfig) -> Result<Self, FetchError> {
        let mut session = Self::new();
        session.apply_config(config)?;
        Ok(session)
    }

    /// Applies every setting of `config` to this session.
    ///
    /// The cookie jar and last-call results are left untouched. An unknown
    /// encoding label keeps the current encoding.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Configuration`] when a configured header name or
    /// value is not valid HTTP.
    pub fn apply_config(&mut self, config: &SessionConfig) -> Result<(), FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let (name, value) = parse_header(name, value)?;
            headers.append(name, value);
        }
        self.headers = headers;

        self.host.clone_from(&config.host);
        self.user_agent.clone_from(&config.user_agent);
        self.accept.clone_from(&config.accept);
        self.content_type.clone_from(&config.content_type);
        self.referer.clone_from(&config.referer);
        self.origin.clone_from(&config.origin);
        self.proxy = config.proxy.as_ref().map(|url| ProxySettings {
            url: url.clone(),
            credentials: config
                .proxy_username
                .as_ref()
                .map(|user| Credentials::new(user.clone(), config.proxy_password.clone())),
        });
        self.credentials = config
            .username
            .as_ref()
            .map(|user| Credentials::new(user.clone(), config.password.clone()));
        self.connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        self.read_timeout = Duration::from_millis(config.read_timeout_ms);
        self.operation_timeout = config.operation_timeout_ms.map(Duration::from_millis);
        self.auto_redirect = config.auto_redirect;
        self.decompression = Decompression {
            gzip: config.gzip,
            deflate: config.deflate,
        };
        self.keep_alive = config.keep_alive;
        self.connection_limit = config.connection_limit;
        self.trust_all_certificates = config.trust_all_certificates;
        self.set_buffer_size(config.buffer_size);
        self.max_response_size = config.max_response_size;
        if !self.set_encoding(&config.encoding) {
            warn!(encoding = %config.encoding, "unknown encoding in config; keeping current");
        }
        self.detection_mode = config.detection_mode;
        Ok(())
    }

    // -- builder-style configuration ------------------------------------

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.set_user_agent(user_agent);
        self
    }

    #[must_use]
    pub fn with_detection_mode(mut self, mode: DetectionMode) -> Self {
        self.detection_mode = mode;
        self
    }

    /// Sets the fallback encoding; an unknown label keeps the current one.
    #[must_use]
    pub fn with_encoding(mut self, label: &str) -> Self {
        if !self.set_encoding(label) {
            warn!(encoding = %label, "unknown encoding; keeping current");
        }
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.set_buffer_size(size);
        self
    }

    #[must_use]
    pub fn with_max_response_size(mut self, size: Option<u64>) -> Self {
        self.max_response_size = size;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auto_redirect(mut self, enabled: bool) -> Self {
        self.auto_redirect = enabled;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }

    // -- configuration setters ------------------------------------------

    /// Overrides the `Host` header.
    pub fn set_host(&mut self, host: Option<String>) {
        self.host = host;
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.user_agent = user_agent.into();
    }

    pub fn set_accept(&mut self, accept: impl Into<String>) {
        self.accept = accept.into();
    }

    /// Sets the `Content-Type` sent with request bodies.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    pub fn set_referer(&mut self, referer: Option<String>) {
        self.referer = referer;
    }

    pub fn set_origin(&mut self, origin: Option<String>) {
        self.origin = origin;
    }

    /// Adds or replaces an extra request header.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Configuration`] if the name or value is not valid HTTP.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), FetchError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Removes an extra request header.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_proxy(&mut self, proxy: Option<ProxySettings>) {
        self.proxy = proxy;
    }

    /// Sets the credentials sent to target servers.
    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Sets the wall-clock ceiling on reading one response body.
    pub fn set_operation_timeout(&mut self, timeout: Option<Duration>) {
        self.operation_timeout = timeout;
    }

    pub fn set_auto_redirect(&mut self, enabled: bool) {
        self.auto_redirect = enabled;
    }

    pub fn set_decompression(&mut self, decompression: Decompression) {
        self.decompression = decompression;
    }

    pub fn set_keep_alive(&mut self, enabled: bool) {
        self.keep_alive = enabled;
    }

    /// Sets the number of idle connections kept per host.
    pub fn set_connection_limit(&mut self, limit: usize) {
        self.connection_limit = limit;
    }

    /// Accepts any server certificate when `trust` is set.
    pub fn set_trust_all_certificates(&mut self, trust: bool) {
        self.trust_all_certificates = trust;
    }

    /// Sets the body chunk size (at least one byte).
    pub fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size.max(1);
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Caps the number of body bytes read per response.
    pub fn set_max_response_size(&mut self, size: Option<u64>) {
        self.max_response_size = size;
    }

    /// Sets the request-body and fallback encoding by label.
    ///
    /// Returns `false`, leaving the encoding unchanged, when the label names
    /// no supported encoding.
    pub fn set_encoding(&mut self, label: &str) -> bool {
        match lookup_encoding(label) {
            Some(encoding) => {
                self.encoding = encoding;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn set_detection_mode(&mut self, mode: DetectionMode) {
        self.detection_mode = mode;
    }

    #[must_use]
    pub fn detection_mode(&self) -> DetectionMode {
        self.detection_mode
    }

    // -- cookies -------------------------------------------------------

    /// The current cookie jar.
    #[must_use]
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.cookie_jar)
    }

    /// Installs a caller-supplied cookie jar.
    pub fn set_cookie_jar(&mut self, jar: Arc<Jar>) {
        self.cookie_jar = jar;
    }

    /// Adds a `Set-Cookie` style cookie scoped to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Configuration`] when `url` does not parse.
    pub fn add_cookie(&self, cookie: &str, url: &str) -> Result<(), FetchError> {
        let url = parse_url(url)?;
        self.cookie_jar.add_cookie_str(cookie, &url);
        Ok(())
    }

    /// Replaces the cookie jar with an empty one.
    ///
    /// The previous jar is not modified, so holders of the old handle keep
    /// their cookies.
    pub fn clear_cookies(&mut self) {
        self.cookie_jar = Arc::new(Jar::default());
    }

    // -- last-call state ------------------------------------------------

    /// Message of the last failure, empty when the last call succeeded.
    #[must_use]
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn clear_error(&mut self) {
        self.last_error.clear();
    }

    #[must_use]
    pub fn last_status(&self) -> Option<StatusCode> {
        self.last_status
    }

    /// Redirect target recorded by the last call, if any.
    #[must_use]
    pub fn last_redirect_location(&self) -> Option<&str> {
        self.last_redirect_location.as_deref()
    }

    /// Encoding used for the last decoded page.
    #[must_use]
    pub fn last_encoding(&self) -> Option<EncodingDecision> {
        self.last_encoding
    }

    // -- verbs ---------------------------------------------------------

    /// Issues a GET and decodes the body.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn get(&mut self, url: &str) -> Result<FetchedPage, FetchError> {
        self.fetch(Method::GET, url, None).await
    }

    /// Issues a POST with `body` encoded in the session encoding.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn post(&mut self, url: &str, body: &str) -> Result<FetchedPage, FetchError> {
        self.fetch(Method::POST, url, Some(body)).await
    }

    /// Issues a PUT with `body` encoded in the session encoding.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn put(&mut self, url: &str, body: &str) -> Result<FetchedPage, FetchError> {
        self.fetch(Method::PUT, url, Some(body)).await
    }

    /// Issues a DELETE and decodes the body.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn delete(&mut self, url: &str) -> Result<FetchedPage, FetchError> {
        self.fetch(Method::DELETE, url, None).await
    }

    /// GET returning only the decoded text.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
        self.get(url).await.map(|page| page.text)
    }

    /// POST returning only the decoded text.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn post_text(&mut self, url: &str, body: &str) -> Result<String, FetchError> {
        self.post(url, body).await.map(|page| page.text)
    }

    /// GET returning only the text; failures yield an empty string and are
    /// left in [`last_error`](Self::last_error).
    pub async fn get_or_default(&mut self, url: &str) -> String {
        self.get(url).await.map(|page| page.text).unwrap_or_default()
    }

    /// POST returning only the text; failures yield an empty string and are
    /// left in [`last_error`](Self::last_error).
    pub async fn post_or_default(&mut self, url: &str, body: &str) -> String {
        self.post(url, body).await.map(|page| page.text).unwrap_or_default()
    }

    /// Sends a request and decodes the response body to text.
    ///
    /// HTTP error statuses are not failures; the body is decoded and the
    /// status recorded. A body cut at the byte cap is returned with
    /// [`FetchedPage::truncated`] set and no error.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Configuration`] for an empty or malformed URL (no
    ///   network activity happens)
    /// - [`FetchError::Network`] for transport failures
    /// - [`FetchError::Timeout`] when the transport or operation timeout expires
    /// - [`FetchError::EmptyBody`] when no body bytes were read
    ///
    /// Every error is also recorded in [`last_error`](Self::last_error).
    #[instrument(skip(self, body), fields(method = %method, url = %url))]
    pub async fn fetch(
        &mut self,
        method: Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<FetchedPage, FetchError> {
        self.begin_call();
        let result = match self.send(method, url, body, self.auto_redirect).await {
            Ok(response) => self.decode_response(url, response).await,
            Err(error) => Err(error),
        };
        self.record_outcome(result)
    }

    /// Sends a request and returns the raw response with its body unread.
    ///
    /// Status and redirect location are recorded; finish with
    /// [`read_text`](Self::read_text) or read the body directly.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch), minus body-related errors.
    #[instrument(skip(self, body), fields(method = %method, url = %url))]
    pub async fn open(
        &mut self,
        method: Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<Response, FetchError> {
        self.begin_call();
        let result = self.send(method, url, body, self.auto_redirect).await;
        self.record_outcome(result)
    }

    /// Decodes the body of a response obtained from [`open`](Self::open).
    ///
    /// The redirect location is computed against the URL passed to `open`,
    /// so a redirect the transport followed is still reported.
    ///
    /// # Errors
    ///
    /// [`FetchError::Network`], [`FetchError::Timeout`] or
    /// [`FetchError::EmptyBody`] while reading the body.
    pub async fn read_text(&mut self, response: Response) -> Result<FetchedPage, FetchError> {
        let url = self
            .last_request_url
            .clone()
            .unwrap_or_else(|| response.url().to_string());
        let result = self.decode_response(&url, response).await;
        self.record_outcome(result)
    }

    /// GETs the body as raw bytes, without decoding.
    ///
    /// The byte cap and operation timeout still apply.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch), except that an empty body is returned
    /// as an empty buffer.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_bytes(&mut self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.begin_call();
        let result = match self.send(Method::GET, url, None, self.auto_redirect).await {
            Ok(response) => {
                let options = self.read_options(url);
                reader::read_bytes(response.bytes_stream(), &options).await
            }
            Err(error) => Err(error),
        };
        self.record_outcome(result)
    }

    // -- internals -----------------------------------------------------

    /// Resets per-call transient state.
    pub(super) fn begin_call(&mut self) {
        self.last_error.clear();
        self.last_status = None;
        self.last_redirect_location = None;
        self.last_request_url = None;
        self.last_encoding = None;
    }

    /// Copies a failure into `last_error` and passes the result through.
    pub(super) fn record_outcome<T>(&mut self, result: Result<T, FetchError>) -> Result<T, FetchError> {
        if let Err(error) = &result {
            warn!(error = %error, "fetch failed");
            self.last_error = error.to_string();
        }
        result
    }

    /// Builds and sends one request, recording status and redirect location.
    pub(super) async fn send(
        &mut self,
        method: Method,
        url: &str,
        body: Option<&str>,
        follow_redirects: bool,
    ) -> Result<Response, FetchError> {
        let request = self.build_request_with(method, url, body, follow_redirects)?;
        self.last_request_url = Some(url.to_string());

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e, started.elapsed()))?;

        let head = ResponseHead::from_response(&response);
        self.last_status = Some(head.status);
        self.last_redirect_location = head.redirect_location(url);
        debug!(
            status = head.status.as_u16(),
            final_url = %head.final_url,
            redirect = ?self.last_redirect_location,
            "response received"
        );
        Ok(response)
    }

    async fn decode_response(
        &mut self,
        requested_url: &str,
        response: Response,
    ) -> Result<FetchedPage, FetchError> {
        let head = ResponseHead::from_response(&response);
        let mut detector = StatisticalDetector::for_host(response.url().host_str());
        let options = self.read_options(requested_url);

        let body = reader::read_text(response.bytes_stream(), &head, &options, &mut detector).await?;
        self.last_encoding = Some(body.encoding);

        info!(
            status = head.status.as_u16(),
            bytes = body.bytes_read,
            encoding = body.encoding.name(),
            truncated = body.truncated,
            "page decoded"
        );

        Ok(FetchedPage {
            text: body.text,
            status: head.status,
            url: head.final_url.clone(),
            encoding: body.encoding,
            redirect_location: head.redirect_location(requested_url),
            bytes_read: body.bytes_read,
            truncated: body.truncated,
        })
    }

    fn read_options<'a>(&self, url: &'a str) -> ReadOptions<'a> {
        ReadOptions {
            url,
            mode: self.detection_mode,
            fallback: self.encoding,
            buffer_size: self.buffer_size,
            max_response_size: self.max_response_size,
            operation_timeout: self.operation_timeout,
        }
    }
}

/// Rejects blank URLs and parses the rest.
pub(super) fn parse_url(url: &str) -> Result<Url, FetchError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(FetchError::empty_url());
    }
    Url::parse(trimmed).map_err(|e| FetchError::configuration(format!("invalid URL '{trimmed}': {e}")))
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), FetchError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| FetchError::configuration(format!("invalid header name '{name}'")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| FetchError::configuration(format!("invalid value for header '{name}'")))?;
    Ok((header_name, header_value))
}

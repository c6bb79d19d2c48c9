//! HTTP helpers shared by the providers
//!
//! Every client built here carries a connect timeout plus either a request
//! timeout (API calls) or an idle read timeout (media streams): no call may
//! block forever.

use crate::error::{Result, SourceError};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::form_urlencoded;

/// Desktop Chrome User-Agent sent by default
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

/// Default timeout for HTTP requests (10 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout (5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout while reading a media body (30 seconds)
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Longest body excerpt kept in error messages
const ERROR_BODY_EXCERPT: usize = 200;

static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[-a-zA-Z0-9+&@#/%?=~_|!:,.;]*[-a-zA-Z0-9+&@#/%=~_|]$")
        .expect("static URL regex")
});

/// Builder for the `reqwest::Client` used by providers and the stream opener
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    /// Whole-request bound, `None` for streaming clients
    timeout: Option<Duration>,
    connect_timeout: Duration,
    /// Idle bound between two body reads
    read_timeout: Option<Duration>,
    user_agent: String,
    cookie_store: bool,
    follow_redirects: bool,
    proxy: Option<String>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: None,
            user_agent: USER_AGENT.to_string(),
            cookie_store: false,
            follow_redirects: true,
            proxy: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the whole-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Turn the builder into one for media streams
    ///
    /// A media body may take far longer to read than any API call, so the
    /// whole-request timeout is dropped. Only the connect timeout and an idle
    /// timeout of `idle` between two reads remain.
    pub fn streaming(mut self, idle: Duration) -> Self {
        self.timeout = None;
        self.read_timeout = Some(idle);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Keep cookies between requests
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookie_store = enabled;
        self
    }

    /// Follow redirects (default) or hand 3xx answers back to the caller
    pub fn follow_redirects(mut self, enabled: bool) -> Self {
        self.follow_redirects = enabled;
        self
    }

    /// Set a proxy URL
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Build the client
    pub fn build(self) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout)
            .cookie_store(self.cookie_store);

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(idle) = self.read_timeout {
            builder = builder.read_timeout(idle);
        }

        if !self.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        if let Some(proxy_url) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| SourceError::permanent(format!("Invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        Ok(builder.build()?)
    }
}

/// Add the headers a desktop Chrome sends on a cross-site navigation
///
/// Several platforms answer differently (or not at all) to requests that do
/// not look like a browser.
pub fn fake_chrome(request: RequestBuilder) -> RequestBuilder {
    fake_browser(request, USER_AGENT)
}

/// Same as [`fake_chrome`] with a caller-chosen User-Agent
pub fn fake_browser(request: RequestBuilder, user_agent: &str) -> RequestBuilder {
    request
        .header("Connection", "keep-alive")
        .header("DNT", "1")
        .header("Upgrade-Insecure-Requests", "1")
        .header("Accept", "*/*")
        .header("Accept-Encoding", "identity")
        .header("Accept-Language", "en-US,en;q=0.9")
        .header(
            "Sec-Ch-Ua",
            "\" Not;A Brand\";v=\"99\", \"Google Chrome\";v=\"97\", \"Chromium\";v=\"97\"",
        )
        .header("Sec-Ch-Ua-Mobile", "?0")
        .header("Sec-Fetch-Dest", "document")
        .header("Sec-Fetch-Mode", "no-cors")
        .header("Sec-Fetch-Site", "cross-site")
        .header("User-Agent", user_agent)
}

/// True if the input looks like an absolute http(s) URL
pub fn is_url(input: &str) -> bool {
    URL_REGEX.is_match(input)
}

/// `application/x-www-form-urlencoded` encoding (spaces become `+`)
pub fn url_encode(input: &str) -> String {
    form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

/// Inverse of [`url_encode`]; also decodes `%XX` sequences in path segments
pub fn url_decode(input: &str) -> String {
    let escaped = input.replace('&', "%26").replace('=', "%3D");
    form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

/// XOR `input` with `key` repeated to the input length
pub fn decrypt_xor(input: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return input.to_vec();
    }

    input
        .iter()
        .zip(key.iter().cycle())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Map a non-success response to a [`SourceError`], keep successful ones
pub async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    debug!(status = status.as_u16(), url = %response.url(), "HTTP response");

    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
    warn!(status = status.as_u16(), url = %url, "Unexpected HTTP status");

    Err(SourceError::from_status(
        status.as_u16(),
        format!("{} returned {}: {}", url, status, excerpt.trim()),
    ))
}

/// Send a request and return the body as text
pub async fn fetch_text(request: RequestBuilder) -> Result<String> {
    let response = check_status(request.send().await?).await?;
    Ok(response.text().await?)
}

/// Send a request and parse the body as JSON
pub async fn fetch_json<T: DeserializeOwned>(provider: &str, request: RequestBuilder) -> Result<T> {
    let text = fetch_text(request).await?;
    serde_json::from_str(&text).map_err(|e| SourceError::parse(provider, e.to_string()))
}

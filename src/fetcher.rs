//! Remote feed fetching.

use flate2::read::GzDecoder;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Default request timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failure below the HTTP layer (DNS, TLS, timeout, connection reset...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Fetches the remote list.
pub trait Fetcher: Send + Sync {
    /// GET `url`, giving up after `timeout`.
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<FetchResponse, TransportError>;
}

/// Blocking HTTP fetcher.
pub struct HttpFetcher {
    user_agent: String,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Create a fetcher with the crate's user agent.
    pub fn new() -> Self {
        Self {
            user_agent: format!("xmlrpc-allowlist/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn client(
        &self,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<reqwest::blocking::Client, TransportError> {
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(self.user_agent.as_str())
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| TransportError(format!("failed to build HTTP client: {}", e)))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<FetchResponse, TransportError> {
        let client = self.client(timeout, verify_tls)?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();

        let raw = response
            .bytes()
            .map_err(|e| TransportError(format!("failed to read response: {}", e)))?;

        let body = decode_body(&raw)?;
        log::debug!("Fetched {} ({} bytes, HTTP {})", url, body.len(), status);

        Ok(FetchResponse { status, body })
    }
}

/// Check if data is gzip compressed.
fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Decompress gzip bodies and decode as (lossy) UTF-8.
fn decode_body(raw: &[u8]) -> Result<String, TransportError> {
    if is_gzip(raw) {
        let mut decoder = GzDecoder::new(raw);
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .map_err(|e| TransportError(format!("gzip decompression failed: {}", e)))?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    } else {
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

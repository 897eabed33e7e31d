//! Candidate fetcher
//!
//! Retrieves the bytes behind a single candidate locator. Only `https`
//! locators are fetched; anything else is reported as
//! [`FetchError::InsecureScheme`] so the caller can skip it without counting
//! an error. Each request carries a browser-like user agent and a referer
//! equal to the locator itself, which gets past most hotlink protection.

use std::io;
use std::path::Path;
use std::time::Duration;

use futures::stream::StreamExt;
use reqwest::header::{ACCEPT, REFERER, USER_AGENT};
use reqwest::{Client, Response};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use url::Url;

use crate::harvest::io::discard;

const ACCEPT_IMAGES: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

/// Error types for candidate fetching
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Not a secure locator: {0}")]
    InsecureScheme(String),

    #[error("Invalid locator: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Skips are not failures and do not count towards the error tally.
    pub fn is_skip(&self) -> bool {
        matches!(self, FetchError::InsecureScheme(_))
    }
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Fetches candidate bytes over a shared HTTP client.
#[derive(Debug, Clone)]
pub struct CandidateFetcher {
    client: Client,
    timeout: Duration,
    user_agent: String,
    allow_plain_http: bool,
}

impl CandidateFetcher {
    pub fn new(client: Client, timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            timeout,
            user_agent: user_agent.into(),
            allow_plain_http: false,
        }
    }

    /// Lets the test transport, which only speaks plain HTTP, through.
    #[cfg(test)]
    pub(crate) fn allow_plain_http(mut self) -> Self {
        self.allow_plain_http = true;
        self
    }

    /// Fetches the whole payload into memory.
    pub async fn fetch(&self, locator: &str) -> FetchResult<Vec<u8>> {
        let response = self.open(locator).await?;

        let mut stream = response.bytes_stream();
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }

        trace!("Fetched {} bytes from {}", data.len(), locator);
        Ok(data)
    }

    /// Streams the payload straight into `path`. On any failure the partial
    /// file is removed before the error is returned.
    pub async fn fetch_to_file(&self, locator: &str, path: &Path) -> FetchResult<u64> {
        let response = self.open(locator).await?;

        match Self::write_stream(response, path).await {
            Ok(written) => {
                trace!("Streamed {} bytes from {} to {}", written, locator, path.display());
                Ok(written)
            }
            Err(e) => {
                let _ = discard(path).await;
                Err(e)
            }
        }
    }

    async fn write_stream(response: Response, path: &Path) -> FetchResult<u64> {
        let mut file = File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }

    /// Checks the scheme, sends the request and rejects non-2xx responses.
    async fn open(&self, locator: &str) -> FetchResult<Response> {
        // No scheme at all (empty, protocol-relative) is not https either.
        let url = match Url::parse(locator) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Err(FetchError::InsecureScheme(String::new()));
            }
            Err(e) => return Err(e.into()),
        };
        let secure = url.scheme() == "https" || (self.allow_plain_http && url.scheme() == "http");
        if !secure {
            return Err(FetchError::InsecureScheme(url.scheme().to_string()));
        }

        debug!("Fetching candidate {}", locator);
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, ACCEPT_IMAGES)
            .header(REFERER, locator)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response)
    }
}

//! Candidate discovery
//!
//! Every remote source implements [`ImageSource`]: given a query and a
//! desired count it produces an ordered list of candidate locators, possibly
//! shorter than asked for. Discovery never fails outright; network or parse
//! problems truncate the list and are reported through the event sink.

pub mod google_api;
pub mod google_scrape;
pub mod paging;
pub mod unsplash;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::harvest::config_loader::{AppConfig, Credentials};
use crate::harvest::events::EventSink;
use crate::harvest::SourceKind;

pub use google_api::GoogleApiSource;
pub use google_scrape::GoogleScrapeSource;
pub use paging::{Cursor, Page};
pub use unsplash::UnsplashSource;

/// Error types for discovery requests
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for discovery requests
pub type SourceResult<T> = Result<T, SourceError>;

/// An opaque image locator produced by discovery.
pub type Candidate = String;

/// Why discovery stopped asking for more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Enough candidates were gathered.
    TargetReached,
    /// A page came back with no items.
    EmptyPage,
    /// A page came back with fewer items than requested.
    ShortPage,
    /// A request failed; what was gathered before it is kept.
    RequestFailed(String),
    /// The source only has a single page.
    SinglePage,
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub candidates: Vec<Candidate>,
    pub stop: StopReason,
}

impl Discovery {
    pub fn empty(stop: StopReason) -> Self {
        Self {
            candidates: Vec::new(),
            stop,
        }
    }
}

/// How accepted candidates reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Stream the response into the destination file, then validate it in
    /// place. The extension comes from the locator.
    StreamToFile,
    /// Decode in memory and write the (possibly upscaled) image. The
    /// extension comes from the decoded format or the caller's type filter.
    DecodeThenSave,
}

/// A discovery strategy for one remote source.
#[async_trait]
pub trait ImageSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn save_mode(&self) -> SaveMode;

    /// Finds up to `desired` candidates for `query`.
    async fn search(&self, query: &str, desired: usize, events: &EventSink) -> Discovery;
}

/// The adapters available to a coordinator, one per [`SourceKind`].
#[derive(Clone)]
pub struct SourceSet {
    google_api: Arc<dyn ImageSource>,
    unsplash: Arc<dyn ImageSource>,
    google_scrape: Arc<dyn ImageSource>,
}

impl SourceSet {
    pub fn new(
        google_api: Arc<dyn ImageSource>,
        unsplash: Arc<dyn ImageSource>,
        google_scrape: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            google_api,
            unsplash,
            google_scrape,
        }
    }

    /// Builds the production adapters from configuration and credentials.
    pub fn from_config(client: Client, config: &AppConfig, credentials: &Credentials) -> Self {
        let timeout = Duration::from_secs(config.http.discovery_timeout_secs);

        let google_api = GoogleApiSource::new(
            client.clone(),
            &config.sources.google_api_endpoint,
            credentials.google_api_key.clone(),
            credentials.google_cse_id.clone(),
        )
        .with_timeout(timeout);

        let unsplash = UnsplashSource::new(
            client.clone(),
            &config.sources.unsplash_endpoint,
            credentials.unsplash_access_key.clone(),
        )
        .with_timeout(timeout);

        let google_scrape = GoogleScrapeSource::new(
            client,
            &config.sources.scrape_endpoint,
            &config.http.user_agent,
            config.sources.scrape_denylist.clone(),
        )
        .with_timeout(timeout);

        Self::new(Arc::new(google_api), Arc::new(unsplash), Arc::new(google_scrape))
    }

    pub fn get(&self, kind: SourceKind) -> Arc<dyn ImageSource> {
        match kind {
            SourceKind::GoogleApi => self.google_api.clone(),
            SourceKind::Unsplash => self.unsplash.clone(),
            SourceKind::GoogleScrape => self.google_scrape.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_set_selects_by_kind() {
        let config = AppConfig::default();
        let set = SourceSet::from_config(Client::new(), &config, &Credentials::default());

        for kind in SourceKind::variants() {
            assert_eq!(set.get(*kind).kind(), *kind);
        }
        assert_eq!(set.get(SourceKind::GoogleApi).save_mode(), SaveMode::StreamToFile);
        assert_eq!(set.get(SourceKind::Unsplash).save_mode(), SaveMode::StreamToFile);
        assert_eq!(set.get(SourceKind::GoogleScrape).save_mode(), SaveMode::DecodeThenSave);
    }
}

//! Unsplash photo search API
//!
//! [Unsplash API Documentation](https://unsplash.com/documentation#search-photos)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::paging::{paginate, Cursor, Page};
use super::{Discovery, ImageSource, SaveMode, SourceError, SourceResult, StopReason};
use crate::harvest::events::EventSink;
use crate::harvest::SourceKind;

/// Unsplash max is 30
pub const MAX_PAGE_SIZE: usize = 30;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    full: Option<String>,
    regular: Option<String>,
}

/// Discovery through Unsplash photo search, landscape only.
#[derive(Debug, Clone)]
pub struct UnsplashSource {
    client: Client,
    endpoint: String,
    access_key: Option<String>,
    timeout: Duration,
}

impl UnsplashSource {
    pub fn new(client: Client, endpoint: impl Into<String>, access_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            access_key,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_page(&self, query: &str, per_page: usize, cursor: Cursor) -> SourceResult<Page> {
        let mut params: Vec<(&str, String)> = vec![
            ("query", query.to_string()),
            ("per_page", per_page.to_string()),
            ("orientation", "landscape".to_string()),
            ("page", cursor.value().to_string()),
        ];
        if let Some(key) = &self.access_key {
            params.push(("client_id", key.clone()));
        }

        debug!("Unsplash API request: {} page={} per_page={}", self.endpoint, cursor.value(), per_page);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        debug!("Unsplash API response status: {}", status);
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        Ok(Page {
            returned: body.results.len(),
            candidates: body
                .results
                .into_iter()
                .filter_map(|photo| {
                    let PhotoUrls { full, regular } = photo.urls;
                    full.filter(|url| !url.is_empty())
                        .or(regular.filter(|url| !url.is_empty()))
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ImageSource for UnsplashSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Unsplash
    }

    fn save_mode(&self) -> SaveMode {
        SaveMode::StreamToFile
    }

    async fn search(&self, query: &str, desired: usize, events: &EventSink) -> Discovery {
        let per_page = desired.clamp(1, MAX_PAGE_SIZE);
        let discovery = paginate(desired, per_page, Cursor::Page(1), move |cursor| {
            self.fetch_page(query, per_page, cursor)
        })
        .await;

        if let StopReason::RequestFailed(e) = &discovery.stop {
            events.warn(format!("[ERROR] Unsplash API error: {}", e));
        }
        debug!("Unsplash API final URL list: {:?}", discovery.candidates);

        discovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn photos(range: std::ops::Range<usize>) -> serde_json::Value {
        let results: Vec<_> = range
            .map(|i| {
                json!({
                    "id": format!("p{}", i),
                    "urls": {
                        "full": format!("https://images.unsplash.com/photo-{}?fm=jpg", i),
                        "regular": format!("https://images.unsplash.com/photo-{}?w=1080", i),
                    }
                })
            })
            .collect();
        json!({ "total": 1000, "total_pages": 34, "results": results })
    }

    fn source(server: &MockServer) -> UnsplashSource {
        UnsplashSource::new(
            Client::new(),
            format!("{}/search/photos", server.uri()),
            Some("access-789".to_string()),
        )
    }

    #[tokio::test]
    async fn test_pages_by_page_number() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "30"))
            .and(query_param("client_id", "access-789"))
            .and(query_param("orientation", "landscape"))
            .respond_with(ResponseTemplate::new(200).set_body_json(photos(0..30)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(photos(30..60)))
            .expect(1)
            .mount(&server)
            .await;

        let (sink, _rx) = EventSink::channel();
        let discovery = source(&server).search("mountains", 45, &sink).await;

        assert_eq!(discovery.stop, StopReason::TargetReached);
        assert_eq!(discovery.candidates.len(), 45);
        assert_eq!(discovery.candidates[44], "https://images.unsplash.com/photo-44?fm=jpg");
    }

    #[tokio::test]
    async fn test_falls_back_to_regular_url() {
        let server = MockServer::start().await;
        let body = json!({
            "results": [
                { "urls": { "regular": "https://images.unsplash.com/photo-r" } },
                { "urls": { "full": "", "regular": "https://images.unsplash.com/photo-e" } },
                { "urls": { "full": "", "regular": "" } },
                { "urls": {} }
            ]
        });
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let (sink, _rx) = EventSink::channel();
        let discovery = source(&server).search("mountains", 10, &sink).await;

        assert_eq!(discovery.stop, StopReason::ShortPage);
        assert_eq!(
            discovery.candidates,
            vec![
                "https://images.unsplash.com/photo-r".to_string(),
                "https://images.unsplash.com/photo-e".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not valid json"))
            .mount(&server)
            .await;

        let (sink, _rx) = EventSink::channel();
        let discovery = source(&server).search("mountains", 10, &sink).await;

        assert!(matches!(discovery.stop, StopReason::RequestFailed(_)));
        assert!(discovery.candidates.is_empty());
    }
}

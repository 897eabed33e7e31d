//! Google Custom Search JSON API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::paging::{paginate, Cursor, Page};
use super::{Discovery, ImageSource, SaveMode, SourceError, SourceResult, StopReason};
use crate::harvest::events::EventSink;
use crate::harvest::SourceKind;

/// Google returns at most ten results per request.
pub const MAX_PAGE_SIZE: usize = 10;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: Option<String>,
}

/// Discovery through the Custom Search image endpoint.
#[derive(Debug, Clone)]
pub struct GoogleApiSource {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    cse_id: Option<String>,
    timeout: Duration,
}

impl GoogleApiSource {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        cse_id: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            cse_id,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_page(&self, query: &str, page_size: usize, cursor: Cursor) -> SourceResult<Page> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("searchType", "image".to_string()),
            ("num", page_size.to_string()),
            ("imgType", "photo".to_string()),
            ("safe", "medium".to_string()),
            ("start", cursor.value().to_string()),
        ];
        if let Some(cx) = &self.cse_id {
            params.push(("cx", cx.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }

        debug!("Google API request: {} start={} num={}", self.endpoint, cursor.value(), page_size);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        debug!("Google API response status: {}", status);
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        Ok(Page {
            returned: body.items.len(),
            candidates: body.items.into_iter().filter_map(|item| item.link).collect(),
        })
    }
}

#[async_trait]
impl ImageSource for GoogleApiSource {
    fn kind(&self) -> SourceKind {
        SourceKind::GoogleApi
    }

    fn save_mode(&self) -> SaveMode {
        SaveMode::StreamToFile
    }

    async fn search(&self, query: &str, desired: usize, events: &EventSink) -> Discovery {
        let page_size = desired.clamp(1, MAX_PAGE_SIZE);
        let discovery = paginate(desired, page_size, Cursor::Offset(1), move |cursor| {
            self.fetch_page(query, page_size, cursor)
        })
        .await;

        if let StopReason::RequestFailed(e) = &discovery.stop {
            events.warn(format!("[ERROR] Google API error: {}", e));
        }
        debug!("Google API final URL list: {:?}", discovery.candidates);

        discovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::harvest::events::RunEvent;

    fn items(range: std::ops::Range<usize>) -> serde_json::Value {
        let items: Vec<_> = range
            .map(|i| json!({ "link": format!("https://img.example.com/{}.jpg", i) }))
            .collect();
        json!({ "items": items })
    }

    fn source(server: &MockServer) -> GoogleApiSource {
        GoogleApiSource::new(
            Client::new(),
            format!("{}/customsearch/v1", server.uri()),
            Some("key-123".to_string()),
            Some("cx-456".to_string()),
        )
    }

    #[tokio::test]
    async fn test_pages_by_offset_until_short_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .and(query_param("start", "1"))
            .and(query_param("num", "10"))
            .and(query_param("key", "key-123"))
            .and(query_param("cx", "cx-456"))
            .and(query_param("searchType", "image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(0..10)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .and(query_param("start", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(10..19)))
            .expect(1)
            .mount(&server)
            .await;

        let (sink, _rx) = EventSink::channel();
        let discovery = source(&server).search("cats", 25, &sink).await;

        assert_eq!(discovery.stop, StopReason::ShortPage);
        assert_eq!(discovery.candidates.len(), 19);
        assert_eq!(discovery.candidates[0], "https://img.example.com/0.jpg");
    }

    #[tokio::test]
    async fn test_page_size_follows_small_targets() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("num", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(0..3)))
            .expect(1)
            .mount(&server)
            .await;

        let (sink, _rx) = EventSink::channel();
        let discovery = source(&server).search("cats", 3, &sink).await;

        assert_eq!(discovery.stop, StopReason::TargetReached);
        assert_eq!(discovery.candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_items_is_an_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "kind": "customsearch#search" })))
            .mount(&server)
            .await;

        let (sink, _rx) = EventSink::channel();
        let discovery = source(&server).search("cats", 10, &sink).await;

        assert_eq!(discovery, Discovery::empty(StopReason::EmptyPage));
    }

    #[tokio::test]
    async fn test_http_error_is_logged_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("start", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(0..10)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("start", "11"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let (sink, mut rx) = EventSink::channel();
        let discovery = source(&server).search("cats", 20, &sink).await;
        drop(sink);

        assert!(matches!(discovery.stop, StopReason::RequestFailed(_)));
        assert_eq!(discovery.candidates.len(), 10);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, RunEvent::Log(ref line) if line.contains("Google API error") && line.contains("429")));
    }

    #[tokio::test]
    async fn test_items_without_link_are_dropped_but_counted() {
        let server = MockServer::start().await;
        let mut body = items(0..9);
        body["items"].as_array_mut().unwrap().push(json!({ "title": "no link" }));
        Mock::given(method("GET"))
            .and(query_param("start", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("start", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let (sink, _rx) = EventSink::channel();
        let discovery = source(&server).search("cats", 20, &sink).await;

        assert_eq!(discovery.stop, StopReason::EmptyPage);
        assert_eq!(discovery.candidates.len(), 9);
    }
}

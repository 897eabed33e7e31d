//! Google image results page scrape
//!
//! A single request, no pagination. Every `<img>` on the page is a possible
//! candidate; the lazy-load `data-src` attribute wins over `src`, only
//! `https://` locators are kept, and anything matching the denylist (site
//! logos, sprites) is dropped.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;

use super::{Candidate, Discovery, ImageSource, SaveMode, SourceError, SourceResult, StopReason};
use crate::harvest::events::EventSink;
use crate::harvest::SourceKind;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Locators extracted from one results page.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScrapedPage {
    /// Number of `<img>` elements on the page.
    pub img_tags: usize,
    /// Usable locators in document order.
    pub candidates: Vec<Candidate>,
}

/// Pulls image locators out of a results page.
pub fn extract_candidates(markup: &str, denylist: &[String]) -> SourceResult<ScrapedPage> {
    let selector = Selector::parse("img")
        .map_err(|e| SourceError::InvalidResponse(format!("bad selector: {:?}", e)))?;
    let document = Html::parse_document(markup);

    let mut page = ScrapedPage::default();
    for element in document.select(&selector) {
        page.img_tags += 1;

        let attrs = element.value();
        let Some(url) = attrs
            .attr("data-src")
            .filter(|v| !v.is_empty())
            .or_else(|| attrs.attr("src").filter(|v| !v.is_empty()))
        else {
            continue;
        };
        if !url.starts_with("https://") {
            continue;
        }
        if denylist.iter().any(|blocked| url.contains(blocked.as_str())) {
            continue;
        }

        page.candidates.push(url.to_string());
    }

    Ok(page)
}

/// Discovery by scraping the image results page.
#[derive(Debug, Clone)]
pub struct GoogleScrapeSource {
    client: Client,
    endpoint: String,
    user_agent: String,
    denylist: Vec<String>,
    timeout: Duration,
}

impl GoogleScrapeSource {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        user_agent: impl Into<String>,
        denylist: Vec<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            user_agent: user_agent.into(),
            denylist,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_results_page(&self, query: &str) -> SourceResult<String> {
        debug!("Google results page request: {} q={}", self.endpoint, query);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("tbm", "isch"), ("start", "0")])
            .header(USER_AGENT, &self.user_agent)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ImageSource for GoogleScrapeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::GoogleScrape
    }

    fn save_mode(&self) -> SaveMode {
        SaveMode::DecodeThenSave
    }

    async fn search(&self, query: &str, desired: usize, events: &EventSink) -> Discovery {
        let page = match self.fetch_results_page(query).await {
            Ok(markup) => extract_candidates(&markup, &self.denylist),
            Err(e) => Err(e),
        };

        match page {
            Ok(page) => {
                events.log(format!(
                    "Google: Found {} <img> tags, using {} image URLs.",
                    page.img_tags,
                    page.candidates.len()
                ));
                let mut candidates = page.candidates;
                candidates.truncate(desired);
                Discovery {
                    candidates,
                    stop: StopReason::SinglePage,
                }
            }
            Err(e) => {
                events.warn(format!("[ERROR] Google search error: {}", e));
                Discovery::empty(StopReason::RequestFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::harvest::events::RunEvent;

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <img src="https://www.gstatic.com/images/branding/logo.png">
          <img src="data:image/gif;base64,R0lGOD" data-src="https://encrypted-tbn0.gstatic.com/images?q=tbn:1">
          <img src="https://encrypted-tbn0.gstatic.com/images?q=tbn:2">
          <img src="http://insecure.example.com/a.jpg">
          <img src="https://ssl.gstatic.com/ui/sprite_v1.png">
          <img alt="no source at all">
          <img data-src="https://encrypted-tbn0.gstatic.com/images?q=tbn:3" src="https://ignored.example.com/x.jpg">
        </body></html>
    "#;

    fn denylist() -> Vec<String> {
        vec!["logo".to_string(), "sprite".to_string()]
    }

    #[test]
    fn test_extract_prefers_lazy_attribute_and_filters() {
        let page = extract_candidates(RESULTS_PAGE, &denylist()).unwrap();

        assert_eq!(page.img_tags, 7);
        assert_eq!(
            page.candidates,
            vec![
                "https://encrypted-tbn0.gstatic.com/images?q=tbn:1".to_string(),
                "https://encrypted-tbn0.gstatic.com/images?q=tbn:2".to_string(),
                "https://encrypted-tbn0.gstatic.com/images?q=tbn:3".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_skips_empty_lazy_attribute() {
        let markup = r#"<img data-src="" src="https://img.example.com/a.jpg"><img src="" data-src="">"#;
        let page = extract_candidates(markup, &[]).unwrap();

        assert_eq!(page.img_tags, 2);
        assert_eq!(page.candidates, vec!["https://img.example.com/a.jpg".to_string()]);
    }

    #[test]
    fn test_extract_from_page_without_images() {
        let page = extract_candidates("<html><p>nothing</p></html>", &denylist()).unwrap();
        assert_eq!(page, ScrapedPage::default());
    }

    #[tokio::test]
    async fn test_search_requests_image_results_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "cats"))
            .and(query_param("tbm", "isch"))
            .and(header("user-agent", "Mozilla/5.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let source = GoogleScrapeSource::new(
            Client::new(),
            format!("{}/search", server.uri()),
            "Mozilla/5.0",
            denylist(),
        );
        let (sink, mut rx) = EventSink::channel();
        let discovery = source.search("cats", 2, &sink).await;
        drop(sink);

        assert_eq!(discovery.stop, StopReason::SinglePage);
        assert_eq!(discovery.candidates.len(), 2);
        assert_eq!(
            rx.recv().await,
            Some(RunEvent::Log("Google: Found 7 <img> tags, using 3 image URLs.".to_string()))
        );
    }

    #[tokio::test]
    async fn test_search_failure_is_empty_and_logged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = GoogleScrapeSource::new(Client::new(), format!("{}/search", server.uri()), "Mozilla/5.0", denylist());
        let (sink, mut rx) = EventSink::channel();
        let discovery = source.search("cats", 5, &sink).await;
        drop(sink);

        assert!(discovery.candidates.is_empty());
        assert!(matches!(discovery.stop, StopReason::RequestFailed(_)));
        assert!(matches!(rx.recv().await, Some(RunEvent::Log(ref line)) if line.contains("503")));
    }
}

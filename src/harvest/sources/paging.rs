//! Shared pagination for the structured search APIs

use std::future::Future;

use tracing::debug;

use super::{Candidate, Discovery, SourceResult, StopReason};

/// Position in a remote result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// 1-based item offset, advanced by the number of items returned.
    Offset(u32),
    /// 1-based page number, advanced by one per page.
    Page(u32),
}

impl Cursor {
    pub fn value(&self) -> u32 {
        match self {
            Cursor::Offset(v) | Cursor::Page(v) => *v,
        }
    }

    pub fn advance(self, returned: usize) -> Self {
        match self {
            Cursor::Offset(v) => Cursor::Offset(v + returned as u32),
            Cursor::Page(v) => Cursor::Page(v + 1),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Items the API returned, usable or not.
    pub returned: usize,
    /// Usable locators extracted from those items.
    pub candidates: Vec<Candidate>,
}

/// Requests pages until `desired` candidates are gathered, a page is empty
/// or short, or a request fails. The result never exceeds `desired`.
pub async fn paginate<F, Fut>(
    desired: usize,
    page_size: usize,
    start: Cursor,
    mut fetch_page: F,
) -> Discovery
where
    F: FnMut(Cursor) -> Fut,
    Fut: Future<Output = SourceResult<Page>>,
{
    if desired == 0 {
        return Discovery::empty(StopReason::TargetReached);
    }

    let mut cursor = start;
    let mut candidates: Vec<Candidate> = Vec::new();

    let stop = loop {
        let page = match fetch_page(cursor).await {
            Ok(page) => page,
            Err(e) => break StopReason::RequestFailed(e.to_string()),
        };

        debug!("Page at {:?} returned {} items", cursor, page.returned);
        if page.returned == 0 {
            break StopReason::EmptyPage;
        }

        candidates.extend(page.candidates);
        cursor = cursor.advance(page.returned);

        if candidates.len() >= desired {
            break StopReason::TargetReached;
        }
        if page.returned < page_size {
            break StopReason::ShortPage;
        }
    };

    candidates.truncate(desired);
    Discovery { candidates, stop }
}

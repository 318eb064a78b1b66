//! Pagination cursor over list-style requests
//!
//! A [`Cursor`] is lazy, finite and forward-only: each [`Cursor::next_page`]
//! performs one list exchange, carrying the continuation token returned by
//! the previous page. Pages are yielded exactly as the remote side returns
//! them. Nothing is reordered or deduplicated, so a resource renamed or
//! deleted mid-iteration may show up zero, one or two times.
//!
//! A cursor cannot be rewound; build a new one to enumerate again.

use crate::cancel::or_cancelled;
use crate::client::ResourceClient;
use crate::error::{PageError, RawFailure, TransportFailure};
use crate::model::{Action, ResourceRef};
use futures_util::Stream;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Parameter carrying the requested page size
pub const PAGE_SIZE_PARAM: &str = "pageSize";

/// One page of list results
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based position of the page in the sequence
    pub number: usize,
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Start,
    After(String),
    Exhausted,
}

pub struct Cursor {
    client: ResourceClient,
    collection: ResourceRef,
    parameters: BTreeMap<String, String>,
    position: Position,
    pages_fetched: usize,
    cancel: CancellationToken,
}

impl Cursor {
    pub(crate) fn new(
        client: ResourceClient,
        collection: ResourceRef,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            collection,
            parameters,
            position: Position::Start,
            pages_fetched: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.parameters
            .insert(PAGE_SIZE_PARAM.to_string(), page_size.to_string());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.position == Position::Exhausted
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page, or `None` once the sequence has ended.
    ///
    /// A failed fetch leaves the position unchanged, so calling again
    /// re-requests the same page.
    pub async fn next_page(&mut self) -> Option<Result<Page, PageError>> {
        let sent = match &self.position {
            Position::Exhausted => return None,
            Position::Start => None,
            Position::After(token) => Some(token.clone()),
        };

        let exchange = self.client.exchange(
            Action::List,
            &self.collection,
            &self.parameters,
            sent.clone(),
        );
        let raw = match or_cancelled(&self.cancel, exchange).await {
            None => return Some(Err(PageError::Cancelled)),
            Some(Err(failure)) => return Some(Err(PageError::Remote(failure))),
            Some(Ok(raw)) => raw,
        };

        let next = raw.continuation_token();
        if next.is_some() && next == sent {
            self.position = Position::Exhausted;
            return Some(Err(PageError::Remote(RawFailure::transport(
                TransportFailure::Malformed,
                format!("remote side repeated continuation token for {}", self.collection),
            ))));
        }

        self.position = match next {
            Some(token) => Position::After(token),
            None => Position::Exhausted,
        };
        self.pages_fetched += 1;

        tracing::debug!(
            page = self.pages_fetched,
            more = !self.is_exhausted(),
            "listed {}",
            self.collection
        );

        Some(Ok(Page {
            number: self.pages_fetched,
            results: raw.results(),
        }))
    }

    /// Drain the cursor, concatenating all pages in order
    pub async fn collect_all(mut self) -> Result<Vec<Value>, PageError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await {
            all.extend(page?.results);
        }
        Ok(all)
    }

    /// Adapt the cursor into a stream of pages
    ///
    /// The stream ends after the first error it yields. Use
    /// [`next_page`](Self::next_page) directly to refetch a failed page.
    pub fn into_stream(self) -> impl Stream<Item = Result<Page, PageError>> {
        futures_util::stream::unfold((self, false), |(mut cursor, failed)| async move {
            if failed {
                return None;
            }
            let page = cursor.next_page().await?;
            let failed = page.is_err();
            Some((page, (cursor, failed)))
        })
    }
}

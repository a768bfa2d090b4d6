use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::RetrievalError;
use crate::retry::RetryPolicy;

use super::{PointFilter, RetrievalResult, ScrollRequest, SearchRequest, SharedIndex};

/// Effectively unbounded result cap for threshold searches. Capping at a
/// top-K would drop qualifying points and understate recall.
pub const EXHAUSTIVE_SEARCH_LIMIT: usize = 10_000_000;

#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    pub query_timeout: Duration,
    pub retry: RetryPolicy,
    pub scroll_page_size: usize,
    pub scroll_max_pages: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            scroll_page_size: 1_000,
            scroll_max_pages: 10_000,
        }
    }
}

/// Uniform retrieval surface over any [`super::VectorIndex`] backend.
#[derive(Debug, Clone)]
pub struct QueryAdapter {
    index: SharedIndex,
    settings: AdapterSettings,
}

impl QueryAdapter {
    pub fn new(index: SharedIndex, settings: AdapterSettings) -> Self {
        Self { index, settings }
    }

    pub fn backend_name(&self) -> &'static str {
        self.index.backend_name()
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    /// Every point scoring at or above `score_threshold`, optionally
    /// restricted by `filters`.
    pub async fn semantic_search(
        &self,
        collection: &str,
        query_embedding: Arc<Vec<f32>>,
        score_threshold: f64,
        filters: &PointFilter,
    ) -> Result<RetrievalResult, RetrievalError> {
        let request = SearchRequest {
            collection: collection.to_string(),
            vector: query_embedding,
            filter: (!filters.is_empty()).then(|| filters.clone()),
            score_threshold: Some(score_threshold),
            limit: EXHAUSTIVE_SEARCH_LIMIT,
            timeout: self.settings.query_timeout,
        };

        let request = &request;
        self.settings
            .retry
            .run("search", move || self.timed("search", self.index.search(request)))
            .await
    }

    /// Every point matching `filters`, with no vector comparison. Pages are
    /// followed until the backend reports no further offset.
    pub async fn filter_only(
        &self,
        collection: &str,
        filters: &PointFilter,
    ) -> Result<RetrievalResult, RetrievalError> {
        if filters.is_empty() {
            return Err(RetrievalError::MalformedFilter(
                "filter-only retrieval requires at least one condition".to_string(),
            ));
        }

        let mut points = RetrievalResult::new();
        let mut offset: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if pages >= self.settings.scroll_max_pages {
                return Err(RetrievalError::Pagination {
                    pages,
                    points: points.len(),
                });
            }

            let request = ScrollRequest {
                collection: collection.to_string(),
                filter: filters.clone(),
                limit: self.settings.scroll_page_size.max(1),
                offset: offset.clone(),
            };
            let request = &request;
            let page = self
                .settings
                .retry
                .run("scroll", move || self.timed("scroll", self.index.scroll(request)))
                .await?;
            pages += 1;
            points.extend(page.points);

            match page.next_page_offset {
                None => break,
                Some(next) if offset.as_deref() == Some(next.as_str()) => {
                    return Err(RetrievalError::Pagination {
                        pages,
                        points: points.len(),
                    });
                }
                Some(next) => {
                    debug!(collection, pages, collected = points.len(), "following scroll offset");
                    offset = Some(next);
                }
            }
        }

        Ok(points)
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, RetrievalError>>,
    ) -> Result<T, RetrievalError> {
        match tokio::time::timeout(self.settings.query_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout {
                operation,
                timeout: self.settings.query_timeout,
            }),
        }
    }
}

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{EvalError, EvalResult, RetrievalError};
use crate::index::{
    RetrievalResult, ScoredPoint, ScrollPage, ScrollRequest, SearchRequest, VectorIndex,
};
use crate::semantic::{Encoder, SemanticModelConfig, resolve_model_config};

use super::labels::GroundTruthIndex;
use super::threshold::Threshold;

type SearchResponder =
    dyn Fn(&str, Threshold) -> Result<Vec<&'static str>, RetrievalError> + Send + Sync;
type ScrollResponder = dyn Fn(&str) -> Result<Vec<&'static str>, RetrievalError> + Send + Sync;

pub struct SpellingEncoder;

impl Encoder for SpellingEncoder {
    fn config(&self) -> &SemanticModelConfig {
        static CONFIG: std::sync::OnceLock<SemanticModelConfig> = std::sync::OnceLock::new();
        CONFIG.get_or_init(|| resolve_model_config("spelling"))
    }

    fn encode(&self, text: &str) -> EvalResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EvalError::Encoding {
                text: text.to_string(),
                reason: "blank".to_string(),
            });
        }
        Ok(text.chars().map(|ch| ch as u32 as f32).collect())
    }
}

fn spell(vector: &[f32]) -> String {
    vector
        .iter()
        .filter_map(|value| char::from_u32(*value as u32))
        .collect()
}

pub struct MockIndex {
    search: Box<SearchResponder>,
    scroll: Box<ScrollResponder>,
    stalled_label: Option<&'static str>,
    calls: Arc<Mutex<Vec<(String, Threshold)>>>,
}

impl MockIndex {
    pub fn new<F>(search: F) -> Self
    where
        F: Fn(&str, Threshold) -> Result<Vec<&'static str>, RetrievalError> + Send + Sync + 'static,
    {
        Self {
            search: Box::new(search),
            scroll: Box::new(|_| Ok(Vec::new())),
            stalled_label: None,
            calls: Arc::default(),
        }
    }

    pub fn with_scroll<F>(mut self, scroll: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<&'static str>, RetrievalError> + Send + Sync + 'static,
    {
        self.scroll = Box::new(scroll);
        self
    }

    pub fn stalling_on(mut self, label: &'static str) -> Self {
        self.stalled_label = Some(label);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<(String, Threshold)>>> {
        Arc::clone(&self.calls)
    }
}

impl fmt::Debug for MockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockIndex").finish_non_exhaustive()
    }
}

fn points(ids: Vec<&'static str>, score: Option<f32>) -> RetrievalResult {
    ids.into_iter()
        .map(|id| ScoredPoint {
            id: id.to_string(),
            score,
            payload: Default::default(),
        })
        .collect()
}

#[async_trait]
impl VectorIndex for MockIndex {
    fn backend_name(&self) -> &'static str {
        "mock"
    }

    async fn search(&self, request: &SearchRequest) -> Result<RetrievalResult, RetrievalError> {
        let label = spell(&request.vector);
        let threshold = Threshold::from_value(request.score_threshold.unwrap_or(0.0))
            .expect("mock thresholds are non-negative");
        self.calls
            .lock()
            .expect("calls lock")
            .push((label.clone(), threshold));
        if self.stalled_label == Some(label.as_str()) {
            std::future::pending::<()>().await;
        }
        (self.search)(&label, threshold).map(|ids| points(ids, Some(1.0)))
    }

    async fn scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, RetrievalError> {
        let value = request
            .filter
            .must
            .first()
            .and_then(|condition| condition.any.first())
            .cloned()
            .unwrap_or_default();
        (self.scroll)(&value).map(|ids| ScrollPage {
            points: points(ids, None),
            next_page_offset: None,
        })
    }
}

pub fn ground_truth(entries: &[(&str, &[&str])]) -> GroundTruthIndex {
    entries
        .iter()
        .map(|(label, ids)| {
            (
                label.to_string(),
                ids.iter().map(|id| id.to_string()).collect::<BTreeSet<String>>(),
            )
        })
        .collect()
}

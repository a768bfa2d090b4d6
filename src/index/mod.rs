//! Vector index access.
//!
//! Backends implement [`VectorIndex`]; the evaluation core only talks to the
//! [`QueryAdapter`], which adds per-query timeouts, bounded retry and scroll
//! pagination on top of the raw backend calls. Nothing here mutates an index
//! except the explicit upsert path of the local sqlite backend.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RetrievalError;

mod adapter;
pub mod qdrant;
pub mod sqlite;

pub use adapter::{AdapterSettings, QueryAdapter};

pub type Payload = Map<String, Value>;

/// One hit returned by a search or scroll call. Scroll hits carry no score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: Option<f32>,
    pub payload: Payload,
}

/// Ordered hits from a single query.
pub type RetrievalResult = Vec<ScoredPoint>;

/// `key` matches when the payload value (or any element of an array value)
/// equals one of `any`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub key: String,
    pub any: Vec<String>,
}

/// Conjunction of field-in-set conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointFilter {
    pub must: Vec<FieldCondition>,
}

impl PointFilter {
    /// Builds a filter from a key -> values mapping. Keys with no values are dropped.
    pub fn from_map(conditions: BTreeMap<String, Vec<String>>) -> Self {
        let must = conditions
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, any)| FieldCondition { key, any })
            .collect();
        Self { must }
    }

    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            must: vec![FieldCondition {
                key: key.into(),
                any: vec![value.into()],
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|condition| {
            let Some(value) = payload.get(&condition.key) else {
                return false;
            };
            match value {
                Value::Array(items) => items
                    .iter()
                    .any(|item| value_matches_any(item, &condition.any)),
                other => value_matches_any(other, &condition.any),
            }
        })
    }
}

fn value_matches_any(value: &Value, candidates: &[String]) -> bool {
    let rendered = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return false,
    };
    candidates.iter().any(|candidate| *candidate == rendered)
}

/// Parses `key=v1,v2` into a single condition.
pub fn parse_filter_arg(raw: &str) -> Result<FieldCondition, RetrievalError> {
    let Some((key, values)) = raw.split_once('=') else {
        return Err(RetrievalError::MalformedFilter(format!(
            "expected key=value[,value...], got '{raw}'"
        )));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(RetrievalError::MalformedFilter(format!(
            "filter key is empty in '{raw}'"
        )));
    }
    let any = values
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>();
    Ok(FieldCondition {
        key: key.to_string(),
        any,
    })
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: String,
    pub vector: Arc<Vec<f32>>,
    pub filter: Option<PointFilter>,
    pub score_threshold: Option<f64>,
    pub limit: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ScrollRequest {
    pub collection: String,
    pub filter: PointFilter,
    pub limit: usize,
    pub offset: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<ScoredPoint>,
    pub next_page_offset: Option<String>,
}

/// Read-side contract of a vector index backend.
#[async_trait]
pub trait VectorIndex: Send + Sync + fmt::Debug {
    fn backend_name(&self) -> &'static str;

    async fn search(&self, request: &SearchRequest) -> Result<RetrievalResult, RetrievalError>;

    async fn scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, RetrievalError>;
}

pub type SharedIndex = Arc<dyn VectorIndex>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().expect("object payload")
    }

    #[test]
    fn filter_matches_scalar_and_array_fields() {
        let filter = PointFilter::from_map(BTreeMap::from([
            ("labels".to_string(), vec!["tax".to_string()]),
            ("urgency".to_string(), vec!["2".to_string(), "3".to_string()]),
            ("ignored".to_string(), Vec::new()),
        ]));
        assert_eq!(filter.must.len(), 2);

        assert!(filter.matches(&payload(json!({"labels": "tax", "urgency": 3}))));
        assert!(filter.matches(&payload(json!({"labels": ["vat", "tax"], "urgency": "2"}))));
        assert!(!filter.matches(&payload(json!({"labels": "income tax", "urgency": 3}))));
        assert!(!filter.matches(&payload(json!({"urgency": 3}))));
    }

    #[test]
    fn parse_filter_arg_splits_values() {
        let condition = parse_filter_arg("document_type = guide, answer ,").expect("valid");
        assert_eq!(condition.key, "document_type");
        assert_eq!(condition.any, vec!["guide".to_string(), "answer".to_string()]);

        assert!(parse_filter_arg("no-equals").is_err());
        assert!(parse_filter_arg("=value").is_err());
    }
}

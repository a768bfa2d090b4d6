//! Qdrant REST backend.
//!
//! Only the two read endpoints the evaluation needs are wrapped:
//! `points/search` and `points/scroll`. Payloads are always requested and
//! vectors never are.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RetrievalError;

use super::{
    Payload, PointFilter, RetrievalResult, ScoredPoint, ScrollPage, ScrollRequest, SearchRequest,
    VectorIndex,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
}

impl QdrantConfig {
    pub fn endpoint(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}", self.port)
        } else {
            format!("http://{host}:{}", self.port)
        }
    }
}

#[derive(Debug, Clone)]
pub struct QdrantIndex {
    config: QdrantConfig,
    http: Client,
}

impl QdrantIndex {
    pub fn new(config: QdrantConfig) -> anyhow::Result<Self> {
        if config.host.trim().is_empty() {
            anyhow::bail!("qdrant host cannot be empty");
        }
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn points_url(&self, collection: &str, operation: &str) -> String {
        format!(
            "{}/collections/{}/points/{}",
            self.config.endpoint(),
            collection,
            operation
        )
    }

    async fn post(
        &self,
        operation: &'static str,
        url: String,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RetrievalError> {
        let mut request = self.http.post(&url).json(&body);
        if let Some(timeout) = timeout {
            request = request
                .query(&[("timeout", timeout.as_secs().max(1))])
                .timeout(timeout);
        }
        if let Some(key) = &self.config.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(operation, &err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        let envelope: QdrantEnvelope = response
            .json()
            .await
            .map_err(|err| RetrievalError::Decode {
                operation,
                reason: err.to_string(),
            })?;
        Ok(envelope.result)
    }
}

#[derive(Debug, Deserialize)]
struct QdrantEnvelope {
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QdrantPointId {
    Number(u64),
    Uuid(String),
}

impl QdrantPointId {
    fn into_string(self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Uuid(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QdrantPoint {
    id: QdrantPointId,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct QdrantScrollResult {
    points: Vec<QdrantPoint>,
    #[serde(default)]
    next_page_offset: Option<QdrantPointId>,
}

impl From<QdrantPoint> for ScoredPoint {
    fn from(point: QdrantPoint) -> Self {
        Self {
            id: point.id.into_string(),
            score: point.score,
            payload: point.payload.unwrap_or_default(),
        }
    }
}

pub fn filter_body(filter: &PointFilter) -> Value {
    let must = filter
        .must
        .iter()
        .map(|condition| {
            json!({
                "key": condition.key,
                "match": { "any": condition.any },
            })
        })
        .collect::<Vec<Value>>();
    json!({ "must": must })
}

/// Scroll offsets are point ids; numeric ids must be sent back as numbers.
fn offset_value(offset: &str) -> Value {
    offset
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(offset))
}

fn transport_error(operation: &'static str, err: &reqwest::Error) -> RetrievalError {
    let transient = err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || err
            .status()
            .is_some_and(|status| status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS);
    RetrievalError::Transport {
        operation,
        reason: err.to_string(),
        transient,
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend_name(&self) -> &'static str {
        "qdrant"
    }

    async fn search(&self, request: &SearchRequest) -> Result<RetrievalResult, RetrievalError> {
        let mut body = json!({
            "vector": request.vector.as_slice(),
            "limit": request.limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(threshold) = request.score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        if let Some(filter) = &request.filter {
            body["filter"] = filter_body(filter);
        }

        let result = self
            .post(
                "search",
                self.points_url(&request.collection, "search"),
                body,
                Some(request.timeout),
            )
            .await?;
        let points: Vec<QdrantPoint> =
            serde_json::from_value(result).map_err(|err| RetrievalError::Decode {
                operation: "search",
                reason: err.to_string(),
            })?;
        Ok(points.into_iter().map(ScoredPoint::from).collect())
    }

    async fn scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, RetrievalError> {
        let mut body = json!({
            "filter": filter_body(&request.filter),
            "limit": request.limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(offset) = &request.offset {
            body["offset"] = offset_value(offset);
        }

        let result = self
            .post(
                "scroll",
                self.points_url(&request.collection, "scroll"),
                body,
                None,
            )
            .await?;
        let page: QdrantScrollResult =
            serde_json::from_value(result).map_err(|err| RetrievalError::Decode {
                operation: "scroll",
                reason: err.to_string(),
            })?;
        Ok(ScrollPage {
            points: page.points.into_iter().map(ScoredPoint::from).collect(),
            next_page_offset: page.next_page_offset.map(QdrantPointId::into_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_body_uses_match_any_conditions() {
        let filter = PointFilter::single("labels", "tax");
        assert_eq!(
            filter_body(&filter),
            json!({"must": [{"key": "labels", "match": {"any": ["tax"]}}]})
        );
    }

    #[test]
    fn scroll_result_decodes_numeric_and_uuid_ids() {
        let raw = json!({
            "points": [
                {"id": 17, "payload": {"labels": "tax"}},
                {"id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26", "payload": null}
            ],
            "next_page_offset": 18
        });
        let page: QdrantScrollResult = serde_json::from_value(raw).expect("decode");
        let points = page
            .points
            .into_iter()
            .map(ScoredPoint::from)
            .collect::<Vec<ScoredPoint>>();
        assert_eq!(points[0].id, "17");
        assert!(points[0].score.is_none());
        assert!(points[1].payload.is_empty());
        assert_eq!(
            page.next_page_offset.map(QdrantPointId::into_string),
            Some("18".to_string())
        );
    }

    #[test]
    fn numeric_offsets_are_sent_as_numbers() {
        assert_eq!(offset_value("42"), json!(42));
        assert_eq!(offset_value("abc-def"), json!("abc-def"));
    }

    #[test]
    fn endpoint_adds_scheme_when_missing() {
        let config = QdrantConfig {
            host: "localhost".to_string(),
            port: 6333,
            api_key: None,
            connect_timeout: Duration::from_secs(5),
        };
        assert_eq!(config.endpoint(), "http://localhost:6333");
    }
}

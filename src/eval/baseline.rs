use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EvalError, EvalResult};
use crate::index::{PointFilter, QueryAdapter};

use super::labels::GroundTruthIndex;
use super::metrics::score_retrieval;

pub const DEFAULT_LABEL_FIELD: &str = "labels";

#[derive(Debug, Clone)]
pub struct BaselineConfig {
    pub collection: String,
    pub label_field: String,
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselinePoint {
    pub label: String,
    pub retrieved: usize,
    pub relevant: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub f2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineFailure {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct BaselineReport {
    pub points: Vec<BaselinePoint>,
    pub failures: Vec<BaselineFailure>,
}

pub async fn run_filter_baseline(
    adapter: Arc<QueryAdapter>,
    ground_truth: Arc<GroundTruthIndex>,
    labels: Vec<String>,
    config: BaselineConfig,
) -> EvalResult<BaselineReport> {
    let labels = labels.into_iter().collect::<BTreeSet<String>>();
    if let Some(unknown) = labels
        .iter()
        .find(|label| ground_truth.relevant(label).is_none())
    {
        return Err(EvalError::data(format!(
            "label '{unknown}' is not present in the ground truth"
        )));
    }

    let config = Arc::new(config);
    let results = stream::iter(labels)
        .map(|label| {
            let adapter = Arc::clone(&adapter);
            let config = Arc::clone(&config);
            async move {
                let filter = PointFilter::single(config.label_field.clone(), label.clone());
                let result = adapter.filter_only(&config.collection, &filter).await;
                (label, result)
            }
        })
        .buffer_unordered(config.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let empty = BTreeSet::new();
    let mut report = BaselineReport::default();
    for (label, result) in results {
        match result {
            Ok(hits) => {
                let relevant = ground_truth.relevant(&label).unwrap_or(&empty);
                let retrieved = hits
                    .iter()
                    .map(|hit| hit.id.as_str())
                    .collect::<BTreeSet<&str>>();
                let scores = score_retrieval(retrieved.iter().copied(), relevant);
                report.points.push(BaselinePoint {
                    retrieved: retrieved.len(),
                    relevant: relevant.len(),
                    label,
                    precision: scores.precision,
                    recall: scores.recall,
                    f1: scores.f1,
                    f2: scores.f2,
                });
            }
            Err(err) => {
                warn!(label = %label, error = %err, "filter-only retrieval failed; excluding label");
                report.failures.push(BaselineFailure {
                    label,
                    reason: err.to_string(),
                });
            }
        }
    }
    report.points.sort_by(|left, right| left.label.cmp(&right.label));
    report.failures.sort_by(|left, right| left.label.cmp(&right.label));

    info!(
        scored = report.points.len(),
        failed = report.failures.len(),
        field = %config.label_field,
        "filter-only baseline finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_support::{MockIndex, ground_truth};
    use super::*;
    use crate::error::RetrievalError;
    use crate::index::AdapterSettings;
    use crate::retry::RetryPolicy;

    fn adapter(index: MockIndex) -> Arc<QueryAdapter> {
        Arc::new(QueryAdapter::new(
            Arc::new(index),
            AdapterSettings {
                query_timeout: Duration::from_secs(5),
                retry: RetryPolicy::no_retry(),
                ..AdapterSettings::default()
            },
        ))
    }

    fn config() -> BaselineConfig {
        BaselineConfig {
            collection: "feedback".to_string(),
            label_field: DEFAULT_LABEL_FIELD.to_string(),
            concurrency: 2,
        }
    }

    #[tokio::test]
    async fn exact_filter_misses_records_that_only_contain_the_label() {
        let index = MockIndex::new(|_, _| Ok(Vec::new())).with_scroll(|value| match value {
            "tax" => Ok(vec!["1"]),
            "vat" => Ok(vec!["2", "9"]),
            _ => Ok(Vec::new()),
        });
        let truth = Arc::new(ground_truth(&[("tax", &["1", "3"]), ("vat", &["2"])]));

        let report = run_filter_baseline(
            adapter(index),
            truth,
            vec!["vat".to_string(), "tax".to_string()],
            config(),
        )
        .await
        .expect("baseline");

        assert!(report.failures.is_empty());
        let tax = &report.points[0];
        assert_eq!(tax.label, "tax");
        assert_eq!(tax.precision, 1.0);
        assert_eq!(tax.recall, 0.5);
        let vat = &report.points[1];
        assert_eq!((vat.retrieved, vat.relevant), (2, 1));
        assert_eq!(vat.precision, 0.5);
        assert_eq!(vat.recall, 1.0);
    }

    #[tokio::test]
    async fn failing_labels_are_excluded_and_reported() {
        let index = MockIndex::new(|_, _| Ok(Vec::new())).with_scroll(|value| match value {
            "tax" => Err(RetrievalError::Pagination {
                pages: 3,
                points: 300,
            }),
            _ => Ok(vec!["2"]),
        });
        let truth = Arc::new(ground_truth(&[("tax", &["1"]), ("vat", &["2"])]));

        let report = run_filter_baseline(
            adapter(index),
            truth,
            vec!["tax".to_string(), "vat".to_string()],
            config(),
        )
        .await
        .expect("baseline");

        assert_eq!(report.points.len(), 1);
        assert_eq!(report.points[0].label, "vat");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].label, "tax");
    }
}

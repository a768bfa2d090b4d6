use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{EvalError, EvalResult};
use crate::index::{PointFilter, QueryAdapter};
use crate::semantic::SharedEncoder;

use super::labels::GroundTruthIndex;
use super::metrics::score_retrieval;
use super::table::{MetricPoint, MetricTable};
use super::threshold::Threshold;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub collection: String,
    pub concurrency: usize,
    pub threshold_concurrency: usize,
    pub filters: PointFilter,
}

impl SweepConfig {
    #[cfg(test)]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            concurrency: 4,
            threshold_concurrency: 4,
            filters: PointFilter::default(),
        }
    }
}

#[derive(Clone)]
pub struct SweepServices {
    pub encoder: SharedEncoder,
    pub adapter: Arc<QueryAdapter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelState {
    Pending,
    Querying,
    Scored,
    Failed,
    Done,
}

impl LabelState {
    pub fn can_advance_to(self, next: LabelState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Querying)
                | (Self::Querying, Self::Scored)
                | (Self::Querying, Self::Failed)
                | (Self::Scored, Self::Done)
                | (Self::Failed, Self::Done)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Querying => "querying",
            Self::Scored => "scored",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for LabelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Encoding,
    Retrieval,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellFailure {
    pub label: String,
    pub threshold: Threshold,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelOutcome {
    pub label: String,
    pub state: LabelState,
    pub verdict: LabelState,
    pub scored_cells: usize,
    pub failed_cells: usize,
}

impl LabelOutcome {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: LabelState::Pending,
            verdict: LabelState::Pending,
            scored_cells: 0,
            failed_cells: 0,
        }
    }

    fn advance(&mut self, next: LabelState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal label transition {} -> {next}",
            self.state
        );
        if matches!(next, LabelState::Scored | LabelState::Failed) {
            self.verdict = next;
        }
        self.state = next;
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub table: MetricTable,
    pub outcomes: Vec<LabelOutcome>,
    pub failures: Vec<CellFailure>,
}

impl SweepReport {
    pub fn failed_labels(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.verdict == LabelState::Failed)
            .count()
    }
}

struct LabelSweep {
    outcome: LabelOutcome,
    points: Vec<MetricPoint>,
    failures: Vec<CellFailure>,
}

struct SweepContext {
    services: SweepServices,
    ground_truth: Arc<GroundTruthIndex>,
    config: SweepConfig,
}

pub async fn run_sweep(
    services: SweepServices,
    ground_truth: Arc<GroundTruthIndex>,
    labels: Vec<String>,
    config: SweepConfig,
) -> EvalResult<SweepReport> {
    let labels = labels.into_iter().collect::<BTreeSet<String>>();
    if let Some(unknown) = labels
        .iter()
        .find(|label| ground_truth.relevant(label).is_none())
    {
        return Err(EvalError::data(format!(
            "label '{unknown}' is not present in the ground truth"
        )));
    }

    let started = Instant::now();
    let concurrency = config.concurrency.max(1);
    info!(
        labels = labels.len(),
        thresholds = Threshold::grid().len(),
        concurrency,
        threshold_concurrency = config.threshold_concurrency.max(1),
        collection = %config.collection,
        "starting threshold sweep"
    );

    let context = Arc::new(SweepContext {
        services,
        ground_truth,
        config,
    });
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();
    for label in &labels {
        let context = Arc::clone(&context);
        let semaphore = Arc::clone(&semaphore);
        let label = label.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return aborted_label(&label, "sweep semaphore closed");
            };
            sweep_label(&context, &label).await
        });
    }

    let mut report = SweepReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(sweep) => {
                for point in sweep.points {
                    report.table.insert(point)?;
                }
                report.failures.extend(sweep.failures);
                report.outcomes.push(sweep.outcome);
            }
            Err(join_error) => {
                error!(error = %join_error, "sweep worker aborted");
            }
        }
    }

    // A worker that panicked never reported back; its label is still owed an outcome.
    let reported = report
        .outcomes
        .iter()
        .map(|outcome| outcome.label.clone())
        .collect::<BTreeSet<String>>();
    for label in labels.difference(&reported) {
        let sweep = aborted_label(label, "sweep worker aborted");
        report.failures.extend(sweep.failures);
        report.outcomes.push(sweep.outcome);
    }

    report.outcomes.sort_by(|left, right| left.label.cmp(&right.label));
    report.failures.sort_by(|left, right| {
        (left.label.as_str(), left.threshold).cmp(&(right.label.as_str(), right.threshold))
    });

    info!(
        labels = report.outcomes.len(),
        metric_points = report.table.len(),
        failed_cells = report.failures.len(),
        failed_labels = report.failed_labels(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "threshold sweep finished"
    );
    Ok(report)
}

async fn sweep_label(context: &Arc<SweepContext>, label: &str) -> LabelSweep {
    let mut outcome = LabelOutcome::new(label);
    outcome.advance(LabelState::Querying);
    debug!(label, "querying label");

    let encoder = &context.services.encoder;
    let retry = context.services.adapter.settings().retry;
    let embedding = match retry.run("encode", move || async move { encoder.encode(label) }).await {
        Ok(vector) => Arc::new(vector),
        Err(err) => {
            warn!(label, error = %err, "query encoding failed; skipping every threshold for label");
            let failures = Threshold::grid()
                .into_iter()
                .map(|threshold| CellFailure {
                    label: label.to_string(),
                    threshold,
                    kind: FailureKind::Encoding,
                    reason: err.to_string(),
                })
                .collect::<Vec<CellFailure>>();
            outcome.failed_cells = failures.len();
            outcome.advance(LabelState::Failed);
            outcome.advance(LabelState::Done);
            return LabelSweep {
                outcome,
                points: Vec::new(),
                failures,
            };
        }
    };

    let cells = stream::iter(Threshold::grid())
        .map(|threshold| {
            let context = Arc::clone(context);
            let embedding = Arc::clone(&embedding);
            async move {
                let result = context
                    .services
                    .adapter
                    .semantic_search(
                        &context.config.collection,
                        embedding,
                        threshold.value(),
                        &context.config.filters,
                    )
                    .await;
                (threshold, result)
            }
        })
        .buffer_unordered(context.config.threshold_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let empty = BTreeSet::new();
    let relevant = context.ground_truth.relevant(label).unwrap_or(&empty);

    let mut points = Vec::new();
    let mut failures = Vec::new();
    for (threshold, result) in cells {
        match result {
            Ok(hits) => {
                let scores = score_retrieval(hits.iter().map(|hit| hit.id.as_str()), relevant);
                points.push(MetricPoint::from_scores(label, threshold, scores));
            }
            Err(err) => {
                warn!(
                    label,
                    threshold = %threshold,
                    error = %err,
                    "retrieval failed; leaving cell empty"
                );
                failures.push(CellFailure {
                    label: label.to_string(),
                    threshold,
                    kind: FailureKind::Retrieval,
                    reason: err.to_string(),
                });
            }
        }
    }

    outcome.scored_cells = points.len();
    outcome.failed_cells = failures.len();
    outcome.advance(if points.is_empty() {
        LabelState::Failed
    } else {
        LabelState::Scored
    });
    outcome.advance(LabelState::Done);
    debug!(
        label,
        scored = outcome.scored_cells,
        failed = outcome.failed_cells,
        verdict = %outcome.verdict,
        "label finished"
    );

    LabelSweep {
        outcome,
        points,
        failures,
    }
}

fn aborted_label(label: &str, reason: &str) -> LabelSweep {
    let mut outcome = LabelOutcome::new(label);
    outcome.advance(LabelState::Querying);
    outcome.advance(LabelState::Failed);
    outcome.advance(LabelState::Done);
    let failures = Threshold::grid()
        .into_iter()
        .map(|threshold| CellFailure {
            label: label.to_string(),
            threshold,
            kind: FailureKind::Aborted,
            reason: reason.to_string(),
        })
        .collect::<Vec<CellFailure>>();
    outcome.failed_cells = failures.len();
    LabelSweep {
        outcome,
        points: Vec::new(),
        failures,
    }
}

pub fn outcome_counts(report: &SweepReport) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for outcome in &report.outcomes {
        *counts.entry(outcome.verdict.as_str()).or_insert(0) += 1;
    }
    counts
}

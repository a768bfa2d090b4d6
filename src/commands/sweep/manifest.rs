use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;

use crate::eval::aggregate::build_line_series;
use crate::eval::artifacts::{ArtifactStore, PERSISTED_METRICS, metric_file_name};
use crate::eval::sweep::{LabelState, SweepReport};
use crate::eval::Metric;
use crate::model::{FailedCellEntry, LabelOutcomeEntry, SweepRunManifest};
use crate::util::{now_utc_string, utc_compact_string};

pub(super) struct SweepRunContext<'a> {
    pub(super) collection: &'a str,
    pub(super) model_id: &'a str,
    pub(super) backend: &'a str,
    pub(super) concurrency: usize,
    pub(super) threshold_concurrency: usize,
    pub(super) duration_ms: u128,
}

pub(super) fn save_metric_artifacts(
    store: &ArtifactStore,
    report: &SweepReport,
) -> Result<BTreeMap<String, String>> {
    let mut checksums = BTreeMap::new();
    for metric in PERSISTED_METRICS {
        store.save_metric_series(metric, &report.table.label_series(metric))?;
        let file_name = metric_file_name(metric)?;
        checksums.insert(file_name.to_string(), store.checksum(file_name)?);
    }
    Ok(checksums)
}

pub(super) fn build_manifest(
    context: &SweepRunContext<'_>,
    report: &SweepReport,
    artifact_checksums: BTreeMap<String, String>,
) -> SweepRunManifest {
    let mean = |metric: Metric| {
        build_line_series(report.table.points(), metric)
            .into_iter()
            .map(|(threshold, value)| (threshold.to_string(), value))
            .collect::<BTreeMap<String, f64>>()
    };

    SweepRunManifest {
        manifest_version: 1,
        run_id: format!("sweep-{}", utc_compact_string(Utc::now())),
        generated_at: now_utc_string(),
        collection: context.collection.to_string(),
        model_id: context.model_id.to_string(),
        backend: context.backend.to_string(),
        concurrency: context.concurrency,
        threshold_concurrency: context.threshold_concurrency,
        label_count: report.outcomes.len(),
        scored_labels: report
            .outcomes
            .iter()
            .filter(|outcome| outcome.verdict == LabelState::Scored)
            .count(),
        failed_labels: report.failed_labels(),
        metric_points: report.table.len(),
        failed_cells: report
            .failures
            .iter()
            .map(|failure| FailedCellEntry {
                label: failure.label.clone(),
                threshold: failure.threshold.to_string(),
                reason: failure.reason.clone(),
            })
            .collect(),
        label_outcomes: report
            .outcomes
            .iter()
            .map(|outcome| LabelOutcomeEntry {
                label: outcome.label.clone(),
                state: outcome.verdict.as_str().to_string(),
                scored_cells: outcome.scored_cells,
                failed_cells: outcome.failed_cells,
            })
            .collect(),
        mean_precision: mean(Metric::Precision),
        mean_recall: mean(Metric::Recall),
        mean_f2: mean(Metric::F2),
        artifact_checksums,
        duration_ms: context.duration_ms,
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::SweepArgs;
use crate::commands::{artifacts_dir, block_on, manifests_dir, open_index, select_labels};
use crate::eval::aggregate::build_line_series;
use crate::eval::artifacts::ArtifactStore;
use crate::eval::sweep::{SweepConfig, SweepReport, SweepServices, outcome_counts, run_sweep};
use crate::eval::Metric;
use crate::index::{PointFilter, QueryAdapter, parse_filter_arg};
use crate::semantic::load_encoder;
use crate::util::{ensure_directory, utc_compact_string, write_json_pretty};

use super::manifest::{SweepRunContext, build_manifest, save_metric_artifacts};

pub fn run(args: SweepArgs) -> Result<()> {
    let store = ArtifactStore::new(artifacts_dir(&args.cache_root, args.artifacts_dir.as_ref()));
    let ground_truth = store
        .load_ground_truth()
        .context("ground truth is required; run the labels command first")?;
    let labels = select_labels(&ground_truth, &args.labels)?;
    let filters = parse_filters(&args.filters)?;

    let encoder = load_encoder(&args.model_id);
    let model_id = encoder.config().model_id.clone();
    let index = open_index(&args.backend, &args.cache_root)?;
    let adapter = Arc::new(QueryAdapter::new(index, args.tuning.adapter_settings()));
    let backend = adapter.backend_name();

    let config = SweepConfig {
        collection: args.backend.collection.clone(),
        concurrency: args.concurrency.max(1),
        threshold_concurrency: args.threshold_concurrency.max(1),
        filters,
    };
    let context = SweepRunContext {
        collection: &config.collection,
        model_id: &model_id,
        backend,
        concurrency: config.concurrency,
        threshold_concurrency: config.threshold_concurrency,
        duration_ms: 0,
    };

    let started = Instant::now();
    let services = SweepServices { encoder, adapter };
    let report = block_on(run_sweep(
        services,
        Arc::new(ground_truth),
        labels,
        config.clone(),
    ))??;
    if report.table.is_empty() {
        warn!(failed_cells = report.failures.len(), "no cell was scored");
    }
    log_line_series(&report);

    if !args.save_outputs {
        return Ok(());
    }

    store.ensure()?;
    let checksums = save_metric_artifacts(&store, &report)?;
    let manifest = build_manifest(
        &SweepRunContext {
            duration_ms: started.elapsed().as_millis(),
            ..context
        },
        &report,
        checksums,
    );
    let manifest_dir = manifests_dir(&args.cache_root);
    ensure_directory(&manifest_dir)?;
    let manifest_path = manifest_dir.join(format!(
        "sweep_run_{}.json",
        utc_compact_string(Utc::now())
    ));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        artifacts = %store.root().display(),
        manifest = %manifest_path.display(),
        metric_points = manifest.metric_points,
        failed_labels = manifest.failed_labels,
        "sweep outputs saved"
    );
    Ok(())
}

pub(super) fn parse_filters(raw: &[String]) -> Result<PointFilter> {
    let mut conditions = BTreeMap::<String, Vec<String>>::new();
    for value in raw {
        let condition = parse_filter_arg(value)?;
        conditions.entry(condition.key).or_default().extend(condition.any);
    }
    Ok(PointFilter::from_map(conditions))
}

fn log_line_series(report: &SweepReport) {
    for (verdict, labels) in outcome_counts(report) {
        info!(verdict, labels, "label outcomes");
    }
    for metric in [Metric::Precision, Metric::Recall, Metric::F2] {
        for (threshold, mean) in build_line_series(report.table.points(), metric) {
            info!(metric = %metric, threshold = %threshold, mean, "mean across labels");
        }
    }
}

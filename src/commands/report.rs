use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::ReportArgs;
use crate::commands::artifacts_dir;
use crate::eval::aggregate::{
    BoxSeries, Distribution, LineSeries, build_box_series, build_line_series,
    summarize_box_series, validate_grid_points,
};
use crate::eval::artifacts::ArtifactStore;
use crate::eval::{Metric, MetricTable, Threshold};
use crate::util::now_utc_string;

#[derive(Debug, Serialize)]
struct MetricReport {
    metric: Metric,
    line: LineSeries,
    boxes: BoxSeries,
    distribution: BTreeMap<Threshold, Distribution>,
}

#[derive(Debug, Serialize)]
struct ThresholdView {
    threshold: Threshold,
    means: BTreeMap<Metric, f64>,
}

#[derive(Debug, Serialize)]
struct EvaluationReport {
    generated_at: String,
    labels: usize,
    metric_points: usize,
    metrics: Vec<MetricReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected: Option<ThresholdView>,
}

pub fn run(args: ReportArgs) -> Result<()> {
    let store = ArtifactStore::new(artifacts_dir(&args.cache_root, args.artifacts_dir.as_ref()));
    let table = load_table(&store)?;
    let selected = args.threshold.as_deref().map(parse_grid_threshold).transpose()?;
    let metrics = if args.metrics.is_empty() {
        Metric::ALL.to_vec()
    } else {
        args.metrics.clone()
    };

    let report = build_report(&table, &metrics, selected);
    info!(
        artifacts = %store.root().display(),
        labels = report.labels,
        metric_points = report.metric_points,
        "evaluation report built"
    );

    if args.json {
        write_json_report(&report)
    } else {
        write_text_report(&report)
    }
}

fn load_table(store: &ArtifactStore) -> Result<MetricTable> {
    if !store.has_metric_series() {
        bail!(
            "metric artifacts missing in {}; run the sweep command with --save-outputs first",
            store.root().display()
        );
    }
    let table = MetricTable::from_series(
        &store.load_metric_series(Metric::Precision)?,
        &store.load_metric_series(Metric::Recall)?,
        &store.load_metric_series(Metric::F2)?,
    )
    .context("persisted metric artifacts are inconsistent")?;
    validate_grid_points(table.points())?;
    Ok(table)
}

fn parse_grid_threshold(raw: &str) -> Result<Threshold> {
    let threshold: Threshold = raw.parse()?;
    if !threshold.is_on_grid() {
        bail!("threshold {raw} is not on the 0.1 sweep grid");
    }
    Ok(threshold)
}

fn build_report(
    table: &MetricTable,
    metrics: &[Metric],
    selected: Option<Threshold>,
) -> EvaluationReport {
    let metric_reports = metrics
        .iter()
        .map(|metric| {
            let boxes = build_box_series(table.points(), *metric);
            MetricReport {
                metric: *metric,
                line: build_line_series(table.points(), *metric),
                distribution: summarize_box_series(&boxes),
                boxes,
            }
        })
        .collect::<Vec<MetricReport>>();

    let selected = selected.map(|threshold| ThresholdView {
        threshold,
        means: metric_reports
            .iter()
            .filter_map(|report| {
                report
                    .line
                    .get(&threshold)
                    .map(|value| (report.metric, *value))
            })
            .collect(),
    });

    EvaluationReport {
        generated_at: now_utc_string(),
        labels: table.labels().len(),
        metric_points: table.len(),
        metrics: metric_reports,
        selected,
    }
}

fn write_json_report(report: &EvaluationReport) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, report)
        .context("failed to serialize report json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_report(report: &EvaluationReport) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(
        output,
        "Labels: {}  Metric points: {}",
        report.labels, report.metric_points
    )?;
    for metric in &report.metrics {
        writeln!(output)?;
        writeln!(output, "{}", metric.metric)?;
        writeln!(output, "threshold\tmean\tmin\tq1\tmedian\tq3\tmax\tn")?;
        for (threshold, mean) in &metric.line {
            match metric.distribution.get(threshold) {
                Some(summary) => writeln!(
                    output,
                    "{threshold}\t{mean:.2}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{}",
                    summary.min, summary.q1, summary.median, summary.q3, summary.max, summary.count
                )?,
                None => writeln!(output, "{threshold}\t{mean:.2}")?,
            }
        }
    }

    if let Some(selected) = &report.selected {
        writeln!(output)?;
        writeln!(output, "At threshold {}:", selected.threshold)?;
        for (metric, value) in &selected.means {
            writeln!(output, "\t{metric}: {value:.2}")?;
        }
    }

    output.flush()?;
    Ok(())
}

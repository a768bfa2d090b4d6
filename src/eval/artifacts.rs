use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::EvalError;
use crate::util::{ensure_directory, read_json, sha256_file, write_json_pretty};

use super::labels::{GroundTruthIndex, LabelSet};
use super::table::{LabelSeries, Metric};
use super::threshold::Threshold;

pub const UNIQUE_LABELS_FILE: &str = "unique_labels.json";
pub const GROUND_TRUTH_FILE: &str = "ground_truth.json";
pub const REGEX_COUNTS_FILE: &str = "regex_counts.json";
pub const BASELINE_FILE: &str = "scroll_baseline.json";
pub const LABELS_MANIFEST_FILE: &str = "labels_manifest.json";

pub fn metric_file_name(metric: Metric) -> Result<&'static str> {
    match metric {
        Metric::Precision => Ok("precision_values.json"),
        Metric::Recall => Ok("recall_values.json"),
        Metric::F2 => Ok("f2_values.json"),
        Metric::F1 => anyhow::bail!("f1 values are derived and never persisted"),
    }
}

pub const PERSISTED_METRICS: [Metric; 3] = [Metric::Precision, Metric::Recall, Metric::F2];

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn ensure(&self) -> Result<()> {
        ensure_directory(&self.root)
    }

    pub fn checksum(&self, file_name: &str) -> Result<String> {
        sha256_file(&self.path(file_name))
    }

    pub fn save_labels(&self, labels: &LabelSet) -> Result<()> {
        write_json_pretty(&self.path(UNIQUE_LABELS_FILE), labels)
    }

    pub fn load_labels(&self) -> Result<LabelSet> {
        read_json(&self.path(UNIQUE_LABELS_FILE))
    }

    pub fn save_ground_truth(&self, index: &GroundTruthIndex) -> Result<()> {
        write_json_pretty(&self.path(GROUND_TRUTH_FILE), index)
    }

    pub fn load_ground_truth(&self) -> Result<GroundTruthIndex> {
        read_json(&self.path(GROUND_TRUTH_FILE))
    }

    pub fn save_regex_counts(&self, counts: &BTreeMap<String, usize>) -> Result<()> {
        write_json_pretty(&self.path(REGEX_COUNTS_FILE), counts)
    }

    pub fn save_metric_series(&self, metric: Metric, series: &LabelSeries) -> Result<()> {
        write_json_pretty(&self.path(metric_file_name(metric)?), series)
    }

    pub fn load_metric_series(&self, metric: Metric) -> Result<LabelSeries> {
        let path = self.path(metric_file_name(metric)?);
        let raw: BTreeMap<String, BTreeMap<String, f64>> = read_json(&path)?;
        parse_series(raw).with_context(|| format!("invalid {metric} values in {}", path.display()))
    }

    pub fn has_metric_series(&self) -> bool {
        PERSISTED_METRICS.iter().all(|metric| {
            metric_file_name(*metric)
                .map(|name| self.path(name).is_file())
                .unwrap_or(false)
        })
    }
}

fn parse_series(raw: BTreeMap<String, BTreeMap<String, f64>>) -> Result<LabelSeries, EvalError> {
    let mut series = LabelSeries::new();
    for (label, values) in raw {
        let mut parsed = BTreeMap::new();
        for (key, value) in values {
            let threshold: Threshold = key.parse()?;
            if !threshold.is_on_grid() {
                return Err(EvalError::aggregation(format!(
                    "label '{label}' has a value at off-grid threshold '{key}'"
                )));
            }
            if parsed.insert(threshold, value).is_some() {
                return Err(EvalError::aggregation(format!(
                    "label '{label}' has more than one value for threshold {threshold}"
                )));
            }
        }
        series.insert(label, parsed);
    }
    Ok(series)
}

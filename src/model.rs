use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordIdValue {
    Text(String),
    Number(i64),
}

impl RecordIdValue {
    pub fn into_string(self) -> String {
        match self {
            Self::Text(value) => value,
            Self::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LabelsField {
    Joined(String),
    List(Vec<String>),
}

impl LabelsField {
    pub fn into_joined(self) -> String {
        match self {
            Self::Joined(value) => value,
            Self::List(values) => values.join(", "),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelledRow {
    pub id: RecordIdValue,
    #[serde(default)]
    pub labels: Option<LabelsField>,
    #[serde(default)]
    pub urgency: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    pub id: String,
    pub labels: Option<String>,
    pub urgency: i64,
}

impl FeedbackRecord {
    #[cfg(test)]
    pub fn new(id: impl Into<String>, labels: impl Into<String>, urgency: i64) -> Self {
        Self {
            id: id.into(),
            labels: Some(labels.into()),
            urgency,
        }
    }
}

impl From<LabelledRow> for FeedbackRecord {
    fn from(row: LabelledRow) -> Self {
        Self {
            id: row.id.into_string(),
            labels: row.labels.map(LabelsField::into_joined),
            urgency: row.urgency.unwrap_or(-1),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelsRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub records_path: String,
    pub record_count: usize,
    pub label_count: usize,
    pub labels_without_matches: usize,
    pub artifact_checksums: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub collection: String,
    pub model_id: String,
    pub embedding_dim: usize,
    pub refresh_mode: String,
    pub corpus_rows: usize,
    pub skipped_empty_rows: usize,
    pub stale_points_before: usize,
    pub upserted_points: usize,
    pub batch_size: usize,
    pub duration_ms: u128,
    pub status: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub collection: String,
    pub model_id: String,
    pub backend: String,
    pub concurrency: usize,
    pub threshold_concurrency: usize,
    pub label_count: usize,
    pub scored_labels: usize,
    pub failed_labels: usize,
    pub metric_points: usize,
    pub failed_cells: Vec<FailedCellEntry>,
    pub label_outcomes: Vec<LabelOutcomeEntry>,
    pub mean_precision: BTreeMap<String, f64>,
    pub mean_recall: BTreeMap<String, f64>,
    pub mean_f2: BTreeMap<String, f64>,
    pub artifact_checksums: BTreeMap<String, String>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedCellEntry {
    pub label: String,
    pub threshold: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelOutcomeEntry {
    pub label: String,
    pub state: String,
    pub scored_cells: usize,
    pub failed_cells: usize,
}

use std::collections::{BTreeMap, BTreeSet, HashSet};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EvalError, EvalResult};
use crate::model::FeedbackRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl FromIterator<String> for LabelSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroundTruthIndex(BTreeMap<String, BTreeSet<String>>);

impl GroundTruthIndex {
    pub fn relevant(&self, label: &str) -> Option<&BTreeSet<String>> {
        self.0.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels_without_matches(&self) -> usize {
        self.0.values().filter(|ids| ids.is_empty()).count()
    }
}

impl FromIterator<(String, BTreeSet<String>)> for GroundTruthIndex {
    fn from_iter<I: IntoIterator<Item = (String, BTreeSet<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn normalize_label_token(token: &str) -> String {
    token.replace(['[', ']'], "").trim().to_string()
}

pub fn validate_records(records: &[FeedbackRecord]) -> EvalResult<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        if record.id.trim().is_empty() {
            return Err(EvalError::data(format!("record at row {row} has an empty id")));
        }
        if !seen.insert(record.id.as_str()) {
            return Err(EvalError::data(format!("duplicate record id '{}'", record.id)));
        }
        raw_labels(record)?;
    }
    Ok(())
}

pub fn extract_labels(records: &[FeedbackRecord]) -> EvalResult<LabelSet> {
    let mut labels = BTreeSet::new();
    let mut dropped_empty = 0usize;
    for record in records {
        for token in raw_labels(record)?.split(',') {
            let label = normalize_label_token(token);
            if label.is_empty() {
                dropped_empty += 1;
            } else {
                labels.insert(label);
            }
        }
    }
    if dropped_empty > 0 {
        debug!(dropped_empty, "ignored empty label tokens");
    }
    Ok(LabelSet(labels))
}

pub fn build_ground_truth_index(
    records: &[FeedbackRecord],
    labels: &LabelSet,
) -> EvalResult<GroundTruthIndex> {
    let raw = records
        .iter()
        .map(|record| raw_labels(record).map(|labels| (record.id.as_str(), labels)))
        .collect::<EvalResult<Vec<(&str, &str)>>>()?;

    let mut index = BTreeMap::new();
    for label in labels.iter() {
        let pattern = label_pattern(label)?;
        let ids = raw
            .iter()
            .filter(|(_, labels)| pattern.is_match(labels))
            .map(|(id, _)| id.to_string())
            .collect::<BTreeSet<String>>();
        index.insert(label.clone(), ids);
    }
    Ok(GroundTruthIndex(index))
}

pub fn regex_match_counts(
    records: &[FeedbackRecord],
    labels: &LabelSet,
) -> EvalResult<BTreeMap<String, usize>> {
    let joined = records
        .iter()
        .map(raw_labels)
        .collect::<EvalResult<Vec<&str>>>()?
        .join(" ");

    labels
        .iter()
        .map(|label| {
            let pattern = label_pattern(label)?;
            Ok((label.clone(), pattern.find_iter(&joined).count()))
        })
        .collect()
}

fn raw_labels(record: &FeedbackRecord) -> EvalResult<&str> {
    record
        .labels
        .as_deref()
        .ok_or_else(|| EvalError::data(format!("record '{}' has no labels field", record.id)))
}

fn label_pattern(label: &str) -> EvalResult<Regex> {
    RegexBuilder::new(&regex::escape(label))
        .case_insensitive(true)
        .build()
        .map_err(|err| EvalError::data(format!("label '{label}' cannot be matched: {err}")))
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};

use super::metrics::{RetrievalScores, f1_score};
use super::threshold::Threshold;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Precision,
    Recall,
    F1,
    F2,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Precision, Metric::Recall, Metric::F1, Metric::F2];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::F2 => "f2",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub label: String,
    pub threshold: Threshold,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub f2: f64,
}

impl MetricPoint {
    pub fn from_scores(label: impl Into<String>, threshold: Threshold, scores: RetrievalScores) -> Self {
        Self {
            label: label.into(),
            threshold,
            precision: scores.precision,
            recall: scores.recall,
            f1: scores.f1,
            f2: scores.f2,
        }
    }

    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Precision => self.precision,
            Metric::Recall => self.recall,
            Metric::F1 => self.f1,
            Metric::F2 => self.f2,
        }
    }
}

pub type LabelSeries = BTreeMap<String, BTreeMap<Threshold, f64>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricTable {
    cells: BTreeMap<(String, Threshold), MetricPoint>,
}

impl MetricTable {
    pub fn insert(&mut self, point: MetricPoint) -> EvalResult<()> {
        let key = (point.label.clone(), point.threshold);
        if self.cells.contains_key(&key) {
            return Err(EvalError::aggregation(format!(
                "duplicate metric point for label '{}' at threshold {}",
                point.label, point.threshold
            )));
        }
        self.cells.insert(key, point);
        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, label: &str, threshold: Threshold) -> Option<&MetricPoint> {
        self.cells.get(&(label.to_string(), threshold))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = &MetricPoint> {
        self.cells.values()
    }

    pub fn labels(&self) -> BTreeSet<&str> {
        self.cells.keys().map(|(label, _)| label.as_str()).collect()
    }

    pub fn label_series(&self, metric: Metric) -> LabelSeries {
        let mut series = LabelSeries::new();
        for point in self.points() {
            series
                .entry(point.label.clone())
                .or_default()
                .insert(point.threshold, point.value(metric));
        }
        series
    }

    pub fn from_series(
        precision: &LabelSeries,
        recall: &LabelSeries,
        f2: &LabelSeries,
    ) -> EvalResult<Self> {
        let precision_keys = series_keys(precision);
        for (name, other) in [("recall", recall), ("f2", f2)] {
            if series_keys(other) != precision_keys {
                return Err(EvalError::aggregation(format!(
                    "{name} values do not cover the same label/threshold cells as precision values"
                )));
            }
        }

        let mut table = Self::default();
        for (label, values) in precision {
            for (threshold, precision) in values {
                let recall = lookup(recall, label, *threshold)?;
                let f2 = lookup(f2, label, *threshold)?;
                table.insert(MetricPoint {
                    label: label.clone(),
                    threshold: *threshold,
                    precision: *precision,
                    recall,
                    f1: f1_score(*precision, recall),
                    f2,
                })?;
            }
        }
        Ok(table)
    }
}

impl FromIterator<MetricPoint> for MetricTable {
    fn from_iter<I: IntoIterator<Item = MetricPoint>>(iter: I) -> Self {
        let cells = iter
            .into_iter()
            .map(|point| ((point.label.clone(), point.threshold), point))
            .collect();
        Self { cells }
    }
}

fn series_keys(series: &LabelSeries) -> BTreeSet<(&str, Threshold)> {
    series
        .iter()
        .flat_map(|(label, values)| values.keys().map(move |threshold| (label.as_str(), *threshold)))
        .collect()
}

fn lookup(series: &LabelSeries, label: &str, threshold: Threshold) -> EvalResult<f64> {
    series
        .get(label)
        .and_then(|values| values.get(&threshold))
        .copied()
        .ok_or_else(|| {
            EvalError::aggregation(format!("missing value for label '{label}' at threshold {threshold}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(label: &str, step: usize, precision: f64, recall: f64) -> MetricPoint {
        MetricPoint {
            label: label.to_string(),
            threshold: Threshold::grid()[step],
            precision,
            recall,
            f1: f1_score(precision, recall),
            f2: super::super::metrics::f2_score(precision, recall),
        }
    }

    #[test]
    fn insert_rejects_duplicate_cells() {
        let mut table = MetricTable::default();
        table.insert(point("tax", 3, 0.5, 0.5)).expect("first insert");
        let error = table.insert(point("tax", 3, 0.9, 0.9)).expect_err("duplicate");
        assert!(matches!(error, EvalError::Aggregation(_)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn series_round_trip_rebuilds_the_same_table() {
        let table = MetricTable::from_iter([
            point("tax", 0, 0.2, 1.0),
            point("tax", 5, 0.75, 0.5),
            point("vat", 5, 0.0, 0.0),
        ]);
        let rebuilt = MetricTable::from_series(
            &table.label_series(Metric::Precision),
            &table.label_series(Metric::Recall),
            &table.label_series(Metric::F2),
        )
        .expect("consistent series");
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn from_series_rejects_mismatched_cells() {
        let table = MetricTable::from_iter([point("tax", 0, 0.2, 1.0), point("tax", 1, 0.3, 0.9)]);
        let mut recall = table.label_series(Metric::Recall);
        if let Some(values) = recall.get_mut("tax") {
            values.remove(&Threshold::grid()[1]);
        }
        let error = MetricTable::from_series(
            &table.label_series(Metric::Precision),
            &recall,
            &table.label_series(Metric::F2),
        )
        .expect_err("recall is missing a cell");
        assert!(matches!(error, EvalError::Aggregation(_)));
    }
}

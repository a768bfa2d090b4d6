use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{EvalError, EvalResult};

use super::table::{Metric, MetricPoint};
use super::threshold::Threshold;

pub type LineSeries = BTreeMap<Threshold, f64>;

pub type BoxSeries = BTreeMap<Threshold, Vec<f64>>;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn validate_grid_points<'a>(points: impl IntoIterator<Item = &'a MetricPoint>) -> EvalResult<()> {
    for point in points {
        if !point.threshold.is_on_grid() {
            return Err(EvalError::aggregation(format!(
                "label '{}' has a value at off-grid threshold {}",
                point.label, point.threshold
            )));
        }
    }
    Ok(())
}

pub fn build_line_series<'a>(
    points: impl IntoIterator<Item = &'a MetricPoint>,
    metric: Metric,
) -> LineSeries {
    let mut sums: BTreeMap<Threshold, (f64, usize)> = BTreeMap::new();
    for point in points {
        let entry = sums.entry(point.threshold).or_insert((0.0, 0));
        entry.0 += point.value(metric);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(threshold, (sum, count))| (threshold, round2(sum / count as f64)))
        .collect()
}

pub fn build_box_series<'a>(
    points: impl IntoIterator<Item = &'a MetricPoint>,
    metric: Metric,
) -> BoxSeries {
    let mut grouped: BTreeMap<Threshold, Vec<(&str, f64)>> = BTreeMap::new();
    for point in points {
        grouped
            .entry(point.threshold)
            .or_default()
            .push((point.label.as_str(), point.value(metric)));
    }
    grouped
        .into_iter()
        .map(|(threshold, mut values)| {
            values.sort_by(|left, right| left.0.cmp(right.0));
            (threshold, values.into_iter().map(|(_, value)| value).collect())
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Distribution {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

pub fn summarize(values: &[f64]) -> Option<Distribution> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(Distribution {
        count: sorted.len(),
        min: sorted[0],
        q1: percentile(&sorted, 25),
        median: percentile(&sorted, 50),
        q3: percentile(&sorted, 75),
        max: sorted[sorted.len() - 1],
    })
}

pub fn summarize_box_series(series: &BoxSeries) -> BTreeMap<Threshold, Distribution> {
    series
        .iter()
        .filter_map(|(threshold, values)| summarize(values).map(|summary| (*threshold, summary)))
        .collect()
}

fn percentile(sorted: &[f64], percentile: usize) -> f64 {
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(label: &str, step: usize, precision: f64) -> MetricPoint {
        MetricPoint {
            label: label.to_string(),
            threshold: Threshold::grid()[step],
            precision,
            recall: 0.0,
            f1: 0.0,
            f2: 0.0,
        }
    }

    #[test]
    fn line_series_averages_and_rounds_per_threshold() {
        let points = vec![point("a", 0, 0.5), point("b", 0, 0.7), point("c", 0, 0.0)];
        let line = build_line_series(&points, Metric::Precision);
        assert_eq!(line.get(&Threshold::grid()[0]), Some(&0.4));

        let uneven = vec![point("a", 1, 1.0), point("b", 1, 0.0), point("c", 1, 0.0)];
        let line = build_line_series(&uneven, Metric::Precision);
        assert_eq!(line.get(&Threshold::grid()[1]), Some(&0.33));
    }

    #[test]
    fn single_label_line_series_reproduces_its_values() {
        let points = Threshold::grid()
            .into_iter()
            .enumerate()
            .map(|(step, _)| point("only", step, 1.0 - step as f64 / 10.0))
            .collect::<Vec<MetricPoint>>();
        let line = build_line_series(&points, Metric::Precision);
        assert_eq!(line.len(), 11);
        for point in &points {
            assert_eq!(line.get(&point.threshold), Some(&round2(point.precision)));
        }
    }

    #[test]
    fn missing_cells_are_excluded_not_zeroed() {
        let points = vec![point("a", 2, 0.8), point("a", 3, 0.6), point("b", 2, 0.4)];
        let line = build_line_series(&points, Metric::Precision);
        assert_eq!(line.get(&Threshold::grid()[2]), Some(&0.6));
        assert_eq!(line.get(&Threshold::grid()[3]), Some(&0.6));
        assert!(!line.contains_key(&Threshold::grid()[4]));

        let boxes = build_box_series(&points, Metric::Precision);
        assert_eq!(boxes.get(&Threshold::grid()[3]), Some(&vec![0.6]));
    }

    #[test]
    fn box_series_orders_values_by_label() {
        let points = vec![point("zeta", 5, 0.1), point("alpha", 5, 0.9), point("mid", 5, 0.5)];
        let boxes = build_box_series(&points, Metric::Precision);
        assert_eq!(boxes.get(&Threshold::grid()[5]), Some(&vec![0.9, 0.5, 0.1]));
    }

    #[test]
    fn off_grid_points_are_rejected() {
        let mut stray = point("a", 0, 0.5);
        stray.threshold = Threshold::from_hundredths(55);
        let error = validate_grid_points([&stray]).expect_err("off grid");
        assert!(matches!(error, EvalError::Aggregation(_)));
        assert!(validate_grid_points(&[point("a", 10, 1.0)]).is_ok());
    }

    #[test]
    fn summary_uses_nearest_rank_quartiles() {
        let summary = summarize(&[0.4, 0.1, 0.3, 0.2]).expect("non-empty");
        assert_eq!(summary.count, 4);
        assert_eq!(summary.min, 0.1);
        assert_eq!(summary.q1, 0.1);
        assert_eq!(summary.median, 0.2);
        assert_eq!(summary.q3, 0.3);
        assert_eq!(summary.max, 0.4);
        assert!(summarize(&[]).is_none());
    }
}

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub f2: f64,
}

pub fn precision(retrieved: &HashSet<&str>, relevant: &BTreeSet<String>) -> f64 {
    if retrieved.is_empty() {
        return 0.0;
    }
    true_positives(retrieved, relevant) as f64 / retrieved.len() as f64
}

pub fn recall(retrieved: &HashSet<&str>, relevant: &BTreeSet<String>) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    true_positives(retrieved, relevant) as f64 / relevant.len() as f64
}

pub fn f1_score(precision: f64, recall: f64) -> f64 {
    let denominator = precision + recall;
    if denominator > 0.0 {
        2.0 * precision * recall / denominator
    } else {
        0.0
    }
}

pub fn f2_score(precision: f64, recall: f64) -> f64 {
    let denominator = 4.0 * precision + recall;
    if denominator > 0.0 {
        5.0 * precision * recall / denominator
    } else {
        0.0
    }
}

pub fn score_retrieval<'a>(
    retrieved: impl IntoIterator<Item = &'a str>,
    relevant: &BTreeSet<String>,
) -> RetrievalScores {
    let retrieved = retrieved.into_iter().collect::<HashSet<&str>>();
    let precision = precision(&retrieved, relevant);
    let recall = recall(&retrieved, relevant);
    RetrievalScores {
        precision,
        recall,
        f1: f1_score(precision, recall),
        f2: f2_score(precision, recall),
    }
}

fn true_positives(retrieved: &HashSet<&str>, relevant: &BTreeSet<String>) -> usize {
    retrieved
        .iter()
        .filter(|id| relevant.contains(**id))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn empty_inputs_score_zero() {
        let relevant = ids(&["1", "2"]);
        let nothing = HashSet::<&str>::new();
        assert_eq!(precision(&nothing, &relevant), 0.0);
        assert_eq!(recall(&HashSet::from(["1"]), &BTreeSet::new()), 0.0);
        assert_eq!(f1_score(0.0, 0.0), 0.0);
        assert_eq!(f2_score(0.0, 0.0), 0.0);
    }

    #[test]
    fn perfect_retrieval_scores_one() {
        let scores = score_retrieval(["1", "2"], &ids(&["1", "2"]));
        assert_eq!(scores.precision, 1.0);
        assert_eq!(scores.recall, 1.0);
        assert_eq!(scores.f1, 1.0);
        assert_eq!(scores.f2, 1.0);
    }

    #[test]
    fn partial_retrieval_matches_hand_computed_values() {
        let scores = score_retrieval(["1", "2"], &ids(&["1", "2", "3"]));
        assert_eq!(scores.precision, 1.0);
        assert!((scores.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((scores.f1 - 0.8).abs() < 1e-12);
        assert!((scores.f2 - 0.714_285_714).abs() < 1e-6);
    }

    #[test]
    fn duplicate_retrieved_ids_are_counted_once() {
        let relevant = ids(&["1", "2"]);
        let with_duplicates = score_retrieval(["1", "1", "1", "9"], &relevant);
        let deduplicated = score_retrieval(["9", "1"], &relevant);
        assert_eq!(with_duplicates, deduplicated);
        assert_eq!(with_duplicates.precision, 0.5);
    }

    #[test]
    fn f2_favours_recall_off_the_diagonal() {
        assert!(f2_score(0.2, 0.8) > f1_score(0.2, 0.8));
        assert!(f2_score(0.8, 0.2) < f1_score(0.8, 0.2));
        for value in [0.1, 0.35, 0.6, 1.0] {
            assert!((f2_score(value, value) - f1_score(value, value)).abs() < 1e-12);
        }
    }

    #[test]
    fn scores_stay_within_unit_interval() {
        let relevant = ids(&["a", "b", "c"]);
        for retrieved in [vec![], vec!["a"], vec!["x", "y"], vec!["a", "b", "c", "d"]] {
            let scores = score_retrieval(retrieved.iter().copied(), &relevant);
            for value in [scores.precision, scores.recall, scores.f1, scores.f2] {
                assert!((0.0..=1.0).contains(&value), "out of range: {value}");
            }
        }
    }
}

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::{artifacts_dir, index_db_path};
use crate::eval::artifacts::{
    ArtifactStore, BASELINE_FILE, GROUND_TRUTH_FILE, PERSISTED_METRICS, REGEX_COUNTS_FILE,
    UNIQUE_LABELS_FILE, metric_file_name,
};
use crate::index::sqlite::SqliteVectorIndex;

pub fn run(args: StatusArgs) -> Result<()> {
    let store = ArtifactStore::new(artifacts_dir(&args.cache_root, args.artifacts_dir.as_ref()));
    let db_path = index_db_path(&args.cache_root, args.db_path.as_ref());

    info!(cache_root = %args.cache_root.display(), "status requested");

    for file_name in [UNIQUE_LABELS_FILE, GROUND_TRUTH_FILE, REGEX_COUNTS_FILE, BASELINE_FILE] {
        report_artifact(&store, file_name);
    }
    for metric in PERSISTED_METRICS {
        report_artifact(&store, metric_file_name(metric)?);
    }

    if store.path(UNIQUE_LABELS_FILE).is_file() {
        match store.load_labels() {
            Ok(labels) => info!(labels = labels.len(), "loaded label vocabulary"),
            Err(err) => warn!(error = %err, "label vocabulary unreadable"),
        }
    }

    if store.path(GROUND_TRUTH_FILE).is_file() {
        match store.load_ground_truth() {
            Ok(ground_truth) => info!(
                labels = ground_truth.len(),
                labels_without_matches = ground_truth.labels_without_matches(),
                "loaded ground truth"
            ),
            Err(err) => warn!(error = %err, "ground truth unreadable"),
        }
    }

    if store.has_metric_series() {
        match store.load_metric_series(PERSISTED_METRICS[0]) {
            Ok(series) => info!(
                labels = series.len(),
                cells = series.values().map(|values| values.len()).sum::<usize>(),
                "loaded sweep results"
            ),
            Err(err) => warn!(error = %err, "sweep results unreadable"),
        }
    }

    if db_path.exists() {
        let index = SqliteVectorIndex::open_read_only(&db_path)?;
        let counts = index.collection_counts()?;
        if counts.is_empty() {
            warn!(path = %db_path.display(), "local vector index is empty");
        }
        for (collection, points) in counts {
            info!(path = %db_path.display(), collection = %collection, points, "local vector index");
        }
    } else {
        warn!(path = %db_path.display(), "local vector index missing");
    }

    Ok(())
}

fn report_artifact(store: &ArtifactStore, file_name: &str) {
    let path = store.path(file_name);
    if path.is_file() {
        info!(path = %path.display(), "artifact present");
    } else {
        warn!(path = %path.display(), "artifact missing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tolerates_an_empty_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        run(StatusArgs {
            cache_root: dir.path().to_path_buf(),
            artifacts_dir: None,
            db_path: None,
        })
        .expect("status on empty cache");
    }
}

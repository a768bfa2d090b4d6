use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::BaselineArgs;
use crate::commands::{artifacts_dir, block_on, open_index, select_labels};
use crate::eval::artifacts::{ArtifactStore, BASELINE_FILE};
use crate::eval::baseline::{BaselineConfig, run_filter_baseline};
use crate::index::QueryAdapter;
use crate::util::write_json_pretty;

pub fn run(args: BaselineArgs) -> Result<()> {
    let store = ArtifactStore::new(artifacts_dir(&args.cache_root, args.artifacts_dir.as_ref()));
    let ground_truth = store
        .load_ground_truth()
        .context("ground truth is required; run the labels command first")?;
    let labels = select_labels(&ground_truth, &args.labels)?;

    let index = open_index(&args.backend, &args.cache_root)?;
    let adapter = Arc::new(QueryAdapter::new(index, args.tuning.adapter_settings()));
    let config = BaselineConfig {
        collection: args.backend.collection.clone(),
        label_field: args.label_field.clone(),
        concurrency: args.concurrency.max(1),
    };

    let report = block_on(run_filter_baseline(
        adapter,
        Arc::new(ground_truth),
        labels,
        config,
    ))??;

    for point in &report.points {
        info!(
            label = %point.label,
            retrieved = point.retrieved,
            relevant = point.relevant,
            precision = point.precision,
            recall = point.recall,
            f2 = point.f2,
            "filter-only baseline"
        );
    }

    if args.save_outputs {
        store.ensure()?;
        let path = store.path(BASELINE_FILE);
        write_json_pretty(&path, &report)?;
        info!(path = %path.display(), "baseline saved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::{Map, Value, json};

    use super::*;
    use crate::cli::{BackendArgs, IndexBackend, QueryTuningArgs};
    use crate::eval::labels::GroundTruthIndex;
    use crate::index::sqlite::{PointUpsert, SqliteVectorIndex};

    fn payload(labels: &str) -> Map<String, Value> {
        let Value::Object(map) = json!({ "labels": labels }) else {
            unreachable!("literal is an object");
        };
        map
    }

    #[test]
    fn baseline_scores_exact_label_matches_from_the_local_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("index.sqlite");
        let index = SqliteVectorIndex::open(&db_path).expect("open");
        let mut points = vec![
            ("1", "tax"),
            ("2", "income tax"),
            ("3", "vat"),
        ]
        .into_iter()
        .map(|(id, labels)| PointUpsert {
            point_id: id.to_string(),
            payload: payload(labels),
            embedding_blob: crate::semantic::encode_embedding_blob(&[1.0, 0.0]),
            embedding_dim: 2,
            text_hash: id.to_string(),
        })
        .collect::<Vec<_>>();
        index
            .upsert_points("feedback", "test", &mut points)
            .expect("upsert");

        let store = ArtifactStore::new(dir.path().join("artifacts"));
        store
            .save_ground_truth(&GroundTruthIndex::from_iter([
                (
                    "tax".to_string(),
                    BTreeSet::from(["1".to_string(), "2".to_string()]),
                ),
                ("vat".to_string(), BTreeSet::from(["3".to_string()])),
            ]))
            .expect("ground truth");

        run(BaselineArgs {
            cache_root: dir.path().to_path_buf(),
            artifacts_dir: None,
            backend: BackendArgs {
                backend: IndexBackend::Sqlite,
                db_path: Some(db_path),
                qdrant_host: "localhost".to_string(),
                qdrant_port: 6333,
                qdrant_api_key: None,
                collection: "feedback".to_string(),
            },
            tuning: QueryTuningArgs {
                query_timeout_ms: 10_000,
                retry_attempts: 1,
                retry_backoff_ms: 0,
                scroll_page_size: 1,
                scroll_max_pages: 100,
            },
            label_field: "labels".to_string(),
            concurrency: 2,
            labels: Vec::new(),
            save_outputs: true,
        })
        .expect("baseline");

        let saved: Value = crate::util::read_json(&store.path(BASELINE_FILE)).expect("saved");
        let points = saved["points"].as_array().expect("points");
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["label"], "tax");
        assert_eq!(points[0]["precision"], 1.0);
        assert_eq!(points[0]["recall"], 0.5);
        assert_eq!(points[1]["label"], "vat");
        assert_eq!(points[1]["recall"], 1.0);
    }
}

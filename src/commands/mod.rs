pub mod baseline;
pub mod index;
pub mod labels;
pub mod report;
pub mod status;
pub mod sweep;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::cli::{BackendArgs, IndexBackend};
use crate::eval::labels::GroundTruthIndex;
use crate::index::SharedIndex;
use crate::index::qdrant::{QdrantConfig, QdrantIndex};
use crate::index::sqlite::SqliteVectorIndex;

pub(crate) const INDEX_DB_FILE: &str = "feedback_index.sqlite";

pub(crate) fn artifacts_dir(cache_root: &Path, explicit: Option<&PathBuf>) -> PathBuf {
    explicit
        .cloned()
        .unwrap_or_else(|| cache_root.join("artifacts"))
}

pub(crate) fn index_db_path(cache_root: &Path, explicit: Option<&PathBuf>) -> PathBuf {
    explicit
        .cloned()
        .unwrap_or_else(|| cache_root.join(INDEX_DB_FILE))
}

pub(crate) fn manifests_dir(cache_root: &Path) -> PathBuf {
    cache_root.join("manifests")
}

pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

pub(crate) fn open_index(backend: &BackendArgs, cache_root: &Path) -> Result<SharedIndex> {
    match backend.backend {
        IndexBackend::Sqlite => {
            let db_path = index_db_path(cache_root, backend.db_path.as_ref());
            if !db_path.exists() {
                bail!(
                    "local vector index not found at {}; run the index command first",
                    db_path.display()
                );
            }
            Ok(Arc::new(SqliteVectorIndex::open_read_only(&db_path)?))
        }
        IndexBackend::Qdrant => {
            let index = QdrantIndex::new(QdrantConfig {
                host: backend.qdrant_host.clone(),
                port: backend.qdrant_port,
                api_key: backend.qdrant_api_key.clone(),
                connect_timeout: Duration::from_secs(10),
            })?;
            Ok(Arc::new(index))
        }
    }
}

pub(crate) fn select_labels(ground_truth: &GroundTruthIndex, requested: &[String]) -> Result<Vec<String>> {
    if ground_truth.is_empty() {
        bail!("ground truth has no labels; check the labelled records");
    }
    if requested.is_empty() {
        return Ok(ground_truth.labels().cloned().collect());
    }
    let mut selected = Vec::with_capacity(requested.len());
    for label in requested {
        if ground_truth.relevant(label).is_none() {
            bail!("label '{label}' is not present in the ground truth");
        }
        if !selected.contains(label) {
            selected.push(label.clone());
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn truth() -> GroundTruthIndex {
        GroundTruthIndex::from_iter([
            ("tax".to_string(), BTreeSet::from(["1".to_string()])),
            ("vat".to_string(), BTreeSet::new()),
        ])
    }

    #[test]
    fn select_labels_rejects_an_empty_ground_truth() {
        let error = select_labels(&GroundTruthIndex::default(), &[]).expect_err("empty");
        assert!(error.to_string().contains("no labels"));
    }

    #[test]
    fn select_labels_defaults_to_every_label() {
        assert_eq!(select_labels(&truth(), &[]).expect("labels"), vec!["tax", "vat"]);
    }

    #[test]
    fn select_labels_rejects_unknown_labels() {
        let requested = vec!["vat".to_string(), "vat".to_string()];
        assert_eq!(select_labels(&truth(), &requested).expect("labels"), vec!["vat"]);
        assert!(select_labels(&truth(), &["pensions".to_string()]).is_err());
    }

    #[test]
    fn default_paths_live_under_the_cache_root() {
        let root = Path::new("/tmp/cache");
        assert_eq!(artifacts_dir(root, None), root.join("artifacts"));
        assert_eq!(index_db_path(root, None), root.join(INDEX_DB_FILE));
        let explicit = PathBuf::from("/elsewhere/index.sqlite");
        assert_eq!(index_db_path(root, Some(&explicit)), explicit);
    }
}

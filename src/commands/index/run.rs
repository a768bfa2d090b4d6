use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{IndexArgs, IndexRefreshMode};
use crate::commands::{index_db_path, manifests_dir};
use crate::index::sqlite::{PointUpsert, SqliteVectorIndex};
use crate::model::IndexRunManifest;
use crate::semantic::{embedding_text_hash, encode_embedding_blob, load_encoder};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::corpus::load_corpus;

pub fn run(args: IndexArgs) -> Result<()> {
    let manifest = build_index(&args)?;

    let manifest_dir = manifests_dir(&args.cache_root);
    ensure_directory(&manifest_dir)?;
    let manifest_path = manifest_dir.join(format!(
        "index_run_{}.json",
        utc_compact_string(Utc::now())
    ));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        path = %manifest_path.display(),
        collection = %manifest.collection,
        upserted_points = manifest.upserted_points,
        "index refresh completed"
    );
    Ok(())
}

pub(super) fn build_index(args: &IndexArgs) -> Result<IndexRunManifest> {
    let batch_size = args.batch_size.max(1);
    let encoder = load_encoder(&args.model_id);
    let model = encoder.config().clone();

    let db_path = index_db_path(&args.cache_root, args.db_path.as_ref());
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_directory(parent)?;
    }
    let index = SqliteVectorIndex::open(&db_path)?;
    let corpus = load_corpus(&args.corpus_path, &args.id_field, &args.text_field)?;

    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("index-{}", utc_compact_string(Utc::now()));

    let existing = index.existing_points(&args.collection, &model.model_id)?;
    let mut skipped_empty_rows = corpus.skipped_empty_rows;
    let mut stale_points_before = 0usize;
    let mut upserted_points = 0usize;
    let mut pending = Vec::<PointUpsert>::new();
    let mut warnings = Vec::<String>::new();

    for point in corpus.points {
        let text_hash = embedding_text_hash(&point.text);
        let stale = existing
            .get(&point.point_id)
            .map(|value| value.text_hash != text_hash || value.embedding_dim != model.dimensions)
            .unwrap_or(true);
        if stale {
            stale_points_before += 1;
        }

        let should_update = match args.refresh_mode {
            IndexRefreshMode::Full => true,
            IndexRefreshMode::MissingOrStale => stale,
        };
        if !should_update {
            continue;
        }

        let embedding = match encoder.encode(&point.text) {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(point_id = %point.point_id, error = %err, "skipping point without encodable text");
                skipped_empty_rows += 1;
                continue;
            }
        };
        pending.push(PointUpsert {
            point_id: point.point_id,
            payload: point.payload,
            embedding_blob: encode_embedding_blob(&embedding),
            embedding_dim: embedding.len(),
            text_hash,
        });

        if pending.len() >= batch_size {
            upserted_points += index.upsert_points(&args.collection, &model.model_id, &mut pending)?;
            info!(
                collection = %args.collection,
                upserted_points,
                corpus_rows = corpus.rows,
                "index batch committed"
            );
        }
    }

    if !pending.is_empty() {
        upserted_points += index.upsert_points(&args.collection, &model.model_id, &mut pending)?;
    }

    if corpus.rows == skipped_empty_rows {
        warnings.push("no corpus rows had indexable text".to_string());
    }

    Ok(IndexRunManifest {
        manifest_version: 1,
        run_id,
        generated_at: started_at,
        collection: args.collection.clone(),
        model_id: model.model_id.clone(),
        embedding_dim: model.dimensions,
        refresh_mode: args.refresh_mode.as_str().to_string(),
        corpus_rows: corpus.rows,
        skipped_empty_rows,
        stale_points_before,
        upserted_points,
        batch_size,
        duration_ms: started.elapsed().as_millis(),
        status: "completed".to_string(),
        warnings,
    })
}

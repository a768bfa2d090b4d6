use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::LabelsArgs;
use crate::eval::artifacts::{
    ArtifactStore, GROUND_TRUTH_FILE, LABELS_MANIFEST_FILE, REGEX_COUNTS_FILE, UNIQUE_LABELS_FILE,
};
use crate::eval::labels::{
    build_ground_truth_index, extract_labels, regex_match_counts, validate_records,
};
use crate::model::{FeedbackRecord, LabelledRow, LabelsRunManifest};
use crate::util::{now_utc_string, read_json_rows, utc_compact_string, write_json_pretty};

pub fn run(args: LabelsArgs) -> Result<()> {
    let store = ArtifactStore::new(super::artifacts_dir(
        &args.cache_root,
        args.artifacts_dir.as_ref(),
    ));
    store.ensure()?;

    let records = load_records(&args.records_path)?;
    validate_records(&records)?;
    info!(
        path = %args.records_path.display(),
        records = records.len(),
        "loaded labelled records"
    );

    let labels = extract_labels(&records)?;
    if labels.is_empty() {
        warn!(path = %args.records_path.display(), "records carry no labels");
    }
    let ground_truth = build_ground_truth_index(&records, &labels)?;
    let regex_counts = regex_match_counts(&records, &labels)?;

    let labels_without_matches = ground_truth.labels_without_matches();
    if labels_without_matches > 0 {
        warn!(labels_without_matches, "some labels match no record");
    }

    store.save_labels(&labels)?;
    store.save_ground_truth(&ground_truth)?;
    store.save_regex_counts(&regex_counts)?;

    let mut artifact_checksums = BTreeMap::new();
    for file_name in [UNIQUE_LABELS_FILE, GROUND_TRUTH_FILE, REGEX_COUNTS_FILE] {
        artifact_checksums.insert(file_name.to_string(), store.checksum(file_name)?);
    }

    let manifest = LabelsRunManifest {
        manifest_version: 1,
        run_id: format!("labels-{}", utc_compact_string(Utc::now())),
        generated_at: now_utc_string(),
        records_path: args.records_path.display().to_string(),
        record_count: records.len(),
        label_count: labels.len(),
        labels_without_matches,
        artifact_checksums,
    };
    write_json_pretty(&store.path(LABELS_MANIFEST_FILE), &manifest)?;

    info!(
        artifacts = %store.root().display(),
        labels = labels.len(),
        "label artifacts written"
    );
    Ok(())
}

pub(crate) fn load_records(path: &Path) -> Result<Vec<FeedbackRecord>> {
    let rows: Vec<LabelledRow> = read_json_rows(path)
        .with_context(|| format!("failed to load labelled records from {}", path.display()))?;
    Ok(rows.into_iter().map(FeedbackRecord::from).collect())
}

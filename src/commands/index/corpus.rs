use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

use crate::index::Payload;
use crate::semantic::normalize_whitespace;
use crate::util::read_json_rows;

#[derive(Debug, Clone)]
pub(super) struct CorpusPoint {
    pub(super) point_id: String,
    pub(super) text: String,
    pub(super) payload: Payload,
}

#[derive(Debug, Default)]
pub(super) struct Corpus {
    pub(super) points: Vec<CorpusPoint>,
    pub(super) rows: usize,
    pub(super) skipped_empty_rows: usize,
}

pub(super) fn load_corpus(path: &Path, id_field: &str, text_field: &str) -> Result<Corpus> {
    let rows: Vec<Map<String, Value>> = read_json_rows(path)
        .with_context(|| format!("failed to load feedback corpus from {}", path.display()))?;

    let mut corpus = Corpus {
        rows: rows.len(),
        ..Corpus::default()
    };
    let mut seen = HashSet::<String>::new();
    for (row_index, row) in rows.into_iter().enumerate() {
        let point_id = match row.get(id_field) {
            Some(Value::String(value)) if !value.trim().is_empty() => value.trim().to_string(),
            Some(Value::Number(value)) => value.to_string(),
            _ => bail!(
                "row {} of {} has no usable '{id_field}' field",
                row_index + 1,
                path.display()
            ),
        };
        if !seen.insert(point_id.clone()) {
            bail!("duplicate point id '{point_id}' in {}", path.display());
        }

        let text = row
            .get(text_field)
            .and_then(Value::as_str)
            .map(normalize_whitespace)
            .unwrap_or_default();
        if text.is_empty() {
            corpus.skipped_empty_rows += 1;
            continue;
        }

        corpus.points.push(CorpusPoint {
            point_id,
            text,
            payload: row,
        });
    }
    Ok(corpus)
}

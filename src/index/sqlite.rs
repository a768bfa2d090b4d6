use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, params};

use crate::error::RetrievalError;
use crate::semantic::{cosine_similarity, decode_embedding_blob};
use crate::util::now_utc_string;

use super::{
    Payload, RetrievalResult, ScoredPoint, ScrollPage, ScrollRequest, SearchRequest, VectorIndex,
};

pub const INDEX_SCHEMA_VERSION: &str = "0.1.0";

/// A point ready to be written to the local index.
#[derive(Debug, Clone)]
pub struct PointUpsert {
    pub point_id: String,
    pub payload: Payload,
    pub embedding_blob: Vec<u8>,
    pub embedding_dim: usize,
    pub text_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingPoint {
    pub text_hash: String,
    pub embedding_dim: usize,
}

/// Local vector index stored in sqlite. Search is an exhaustive cosine scan
/// over the collection, so every qualifying point is returned.
#[derive(Debug, Clone)]
pub struct SqliteVectorIndex {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteVectorIndex {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open vector index: {}", db_path.display()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL for vector index")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL for vector index")?;

        Self::from_connection(connection)
    }

    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open vector index read-only: {}", db_path.display()))?;

        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('metadata', 'points')",
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to inspect vector index: {}", db_path.display()))?;
        if tables != 2 {
            anyhow::bail!(
                "{} is not a vector index; run the index command first",
                db_path.display()
            );
        }

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        ensure_index_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow::anyhow!("vector index connection mutex poisoned"))
    }

    pub fn existing_points(
        &self,
        collection: &str,
        model_id: &str,
    ) -> Result<HashMap<String, ExistingPoint>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "
            SELECT point_id, text_hash, embedding_dim
            FROM points
            WHERE collection = ?1 AND model_id = ?2
            ",
        )?;
        let mut rows = statement.query(params![collection, model_id])?;

        let mut out = HashMap::<String, ExistingPoint>::new();
        while let Some(row) = rows.next()? {
            out.insert(
                row.get(0)?,
                ExistingPoint {
                    text_hash: row.get(1)?,
                    embedding_dim: row.get::<_, i64>(2)? as usize,
                },
            );
        }
        Ok(out)
    }

    /// Writes one batch inside a single transaction.
    pub fn upsert_points(
        &self,
        collection: &str,
        model_id: &str,
        points: &mut Vec<PointUpsert>,
    ) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        let generated_at = now_utc_string();
        let mut written = 0usize;
        for point in points.drain(..) {
            let payload_json = serde_json::to_string(&point.payload)
                .with_context(|| format!("failed to serialize payload for {}", point.point_id))?;
            tx.execute(
                "
                INSERT INTO points(collection, point_id, model_id, payload_json, embedding, embedding_dim, text_hash, generated_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(collection, point_id) DO UPDATE SET
                  model_id=excluded.model_id,
                  payload_json=excluded.payload_json,
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  text_hash=excluded.text_hash,
                  generated_at=excluded.generated_at
                ",
                params![
                    collection,
                    point.point_id,
                    model_id,
                    payload_json,
                    point.embedding_blob,
                    point.embedding_dim as i64,
                    point.text_hash,
                    generated_at,
                ],
            )?;
            written += 1;
        }
        tx.commit()?;

        Ok(written)
    }

    pub fn collection_counts(&self) -> Result<Vec<(String, i64)>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT collection, COUNT(*) FROM points GROUP BY collection ORDER BY collection ASC",
        )?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;
        Ok(rows)
    }

    fn search_blocking(&self, request: &SearchRequest) -> Result<RetrievalResult, RetrievalError> {
        let connection = self.lock().map_err(|err| local_error("search", err))?;
        let mut statement = connection
            .prepare(
                "
                SELECT point_id, payload_json, embedding, embedding_dim
                FROM points
                WHERE collection = ?1
                ",
            )
            .map_err(|err| local_error("search", err))?;
        let mut rows = statement
            .query(params![request.collection])
            .map_err(|err| local_error("search", err))?;

        let mut hits = RetrievalResult::new();
        while let Some(row) = rows.next().map_err(|err| local_error("search", err))? {
            let row_dim = row
                .get::<_, i64>(3)
                .map_err(|err| local_error("search", err))? as usize;
            if row_dim != request.vector.len() {
                continue;
            }
            let blob = row
                .get::<_, Vec<u8>>(2)
                .map_err(|err| local_error("search", err))?;
            let Some(embedding) = decode_embedding_blob(&blob, row_dim) else {
                continue;
            };

            let score = cosine_similarity(&request.vector, &embedding);
            if request.score_threshold.is_some_and(|minimum| score < minimum) {
                continue;
            }

            let payload = decode_payload(row.get::<_, String>(1).map_err(|err| local_error("search", err))?)?;
            if let Some(filter) = &request.filter
                && !filter.matches(&payload)
            {
                continue;
            }

            hits.push(ScoredPoint {
                id: row.get(0).map_err(|err| local_error("search", err))?,
                score: Some(score as f32),
                payload,
            });
        }

        hits.sort_by(|left, right| {
            right
                .score
                .unwrap_or(f32::MIN)
                .total_cmp(&left.score.unwrap_or(f32::MIN))
                .then(left.id.cmp(&right.id))
        });
        if hits.len() > request.limit {
            hits.truncate(request.limit);
        }

        Ok(hits)
    }

    fn scroll_blocking(&self, request: &ScrollRequest) -> Result<ScrollPage, RetrievalError> {
        let connection = self.lock().map_err(|err| local_error("scroll", err))?;
        let mut statement = connection
            .prepare(
                "
                SELECT point_id, payload_json
                FROM points
                WHERE collection = ?1 AND (?2 IS NULL OR point_id >= ?2)
                ORDER BY point_id ASC
                ",
            )
            .map_err(|err| local_error("scroll", err))?;
        let mut rows = statement
            .query(params![request.collection, request.offset])
            .map_err(|err| local_error("scroll", err))?;

        let limit = request.limit.max(1);
        let mut page = ScrollPage::default();
        while let Some(row) = rows.next().map_err(|err| local_error("scroll", err))? {
            let payload = decode_payload(row.get::<_, String>(1).map_err(|err| local_error("scroll", err))?)?;
            if !request.filter.matches(&payload) {
                continue;
            }
            let point_id: String = row.get(0).map_err(|err| local_error("scroll", err))?;
            if page.points.len() == limit {
                page.next_page_offset = Some(point_id);
                break;
            }
            page.points.push(ScoredPoint {
                id: point_id,
                score: None,
                payload,
            });
        }

        Ok(page)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn search(&self, request: &SearchRequest) -> Result<RetrievalResult, RetrievalError> {
        let index = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || index.search_blocking(&request))
            .await
            .map_err(|err| local_error("search", err))?
    }

    async fn scroll(&self, request: &ScrollRequest) -> Result<ScrollPage, RetrievalError> {
        let index = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || index.scroll_blocking(&request))
            .await
            .map_err(|err| local_error("scroll", err))?
    }
}

pub fn ensure_index_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS points (
          collection TEXT NOT NULL,
          point_id TEXT NOT NULL,
          model_id TEXT NOT NULL,
          payload_json TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          text_hash TEXT NOT NULL,
          generated_at TEXT NOT NULL,
          PRIMARY KEY(collection, point_id)
        );

        CREATE INDEX IF NOT EXISTS idx_points_collection_model
          ON points(collection, model_id);
        ",
    )?;

    connection.execute(
        "
        INSERT INTO metadata(key, value) VALUES('schema_version', ?1)
        ON CONFLICT(key) DO UPDATE SET value=excluded.value
        ",
        [INDEX_SCHEMA_VERSION],
    )?;

    Ok(())
}

fn decode_payload(raw: String) -> Result<Payload, RetrievalError> {
    serde_json::from_str::<Payload>(&raw).map_err(|err| RetrievalError::Decode {
        operation: "payload",
        reason: err.to_string(),
    })
}

fn local_error(operation: &'static str, err: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Local {
        operation,
        reason: err.to_string(),
    }
}

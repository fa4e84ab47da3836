// src/index/mod.rs
// Single-writer index service: owns the HNSW graph and the durable
// embedding rows, keeps both consistent through write-through updates, and
// serves searches under optional time-weighted ranking.

pub mod hnsw;

pub use self::hnsw::{HnswIndex, SearchHit};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::DatabasePool;
use crate::embeddings::EmbeddingClient;
use crate::error::{EngramError, Result};

/// Half-life for time-weighted ranking (30 days, in ms).
const HALF_LIFE_MS: f64 = 30.0 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Index statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub indexed_files: usize,
    pub index_size: usize,
}

/// Graph plus the updated_at shadow map, guarded together. Embeddings are
/// computed before this lock is taken; only graph/row mutation happens
/// under it.
struct IndexInner {
    index: HnswIndex,
    updated_at: HashMap<String, i64>,
}

/// The only mutator of the HNSW graph and of the embedding table.
pub struct IndexService {
    pool: Arc<DatabasePool>,
    embedder: Arc<EmbeddingClient>,
    inner: Mutex<IndexInner>,
}

/// Convert an embedding vector to little-endian bytes for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of embedding_to_bytes.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl IndexService {
    /// Open the service: ensure the table exists (pool migration), then
    /// rebuild a fresh HNSW from every persisted row. Rows that fail to
    /// insert are logged and skipped; the service still comes up.
    pub async fn open(pool: Arc<DatabasePool>, embedder: Arc<EmbeddingClient>) -> Result<Self> {
        let rows: Vec<(String, Vec<u8>, i64)> = pool
            .interact_raw(|conn| {
                let mut stmt =
                    conn.prepare("SELECT path, embedding, updated_at FROM embeddings")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
                rows.collect()
            })
            .await?;

        let mut index = HnswIndex::new(embedder.dimensions());
        let mut updated_at = HashMap::with_capacity(rows.len());
        let total = rows.len();
        for (path, blob, ts) in rows {
            let vector = bytes_to_embedding(&blob);
            match index.insert(&path, vector) {
                Ok(()) => {
                    updated_at.insert(path, ts);
                }
                Err(e) => warn!(path = %path, "skipping row during index rebuild: {}", e),
            }
        }
        info!(rows = total, indexed = index.len(), "vector index rebuilt");

        Ok(Self {
            pool,
            embedder,
            inner: Mutex::new(IndexInner { index, updated_at }),
        })
    }

    pub fn embedder(&self) -> &Arc<EmbeddingClient> {
        &self.embedder
    }

    /// Embed `content` and write it through: persistent row first, then
    /// graph replace (delete tolerates absence).
    pub async fn update(&self, id: &str, content: &str) -> Result<()> {
        let embedding = self
            .embedder
            .embed(content)
            .await
            .map_err(|e| EngramError::Embedding(format!("indexing failed: {e}")))?;
        let now_ms = Utc::now().timestamp_millis();
        self.apply_update(id, embedding.vector, now_ms).await
    }

    /// Write a precomputed vector under the single-writer lock. Split from
    /// `update` so the embedding call never runs while the lock is held.
    async fn apply_update(&self, id: &str, vector: Vec<f32>, updated_at: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let blob = embedding_to_bytes(&vector);
        let row_id = id.to_string();
        self.pool
            .interact_raw(move |conn| {
                conn.execute(
                    "INSERT INTO embeddings (path, embedding, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(path) DO UPDATE SET embedding = ?2, updated_at = ?3",
                    params![row_id, blob, updated_at],
                )
            })
            .await?;

        inner.index.remove(id);
        inner.index.insert(id, vector)?;
        inner.updated_at.insert(id.to_string(), updated_at);
        Ok(())
    }

    /// Remove the persistent row and the graph node. Absence is tolerated.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let row_id = id.to_string();
        self.pool
            .interact_raw(move |conn| {
                conn.execute("DELETE FROM embeddings WHERE path = ?1", params![row_id])
            })
            .await?;

        inner.index.remove(id);
        inner.updated_at.remove(id);
        Ok(())
    }

    /// Semantic search. With `time_weight`, 3k candidates are fetched and
    /// re-ranked by recency-blended score before keeping the top k.
    pub async fn search(&self, query: &str, k: usize, time_weight: bool) -> Result<Vec<SearchHit>> {
        let fetch = if time_weight { k * 3 } else { k };
        self.run_search(query, k, fetch, time_weight, |_| true).await
    }

    /// Search restricted to ids accepted by `filter` (e.g. a path prefix).
    /// Always over-fetches 3k so filtering can still fill k results.
    pub async fn search_filtered(
        &self,
        query: &str,
        k: usize,
        time_weight: bool,
        filter: impl Fn(&str) -> bool,
    ) -> Result<Vec<SearchHit>> {
        self.run_search(query, k, k * 3, time_weight, filter).await
    }

    async fn run_search(
        &self,
        query: &str,
        k: usize,
        fetch: usize,
        time_weight: bool,
        filter: impl Fn(&str) -> bool,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| EngramError::Embedding(format!("search failed: {e}")))?;

        let inner = self.inner.lock().await;
        let mut hits = inner.index.search(&embedding.vector, fetch.max(k), None)?;
        hits.retain(|h| filter(&h.id));

        if time_weight {
            let now_ms = Utc::now().timestamp_millis();
            for hit in hits.iter_mut() {
                let age = inner
                    .updated_at
                    .get(&hit.id)
                    .map(|ts| (now_ms - ts).max(0) as f64)
                    .unwrap_or(0.0);
                hit.score = time_weighted_score(hit.score, age);
            }
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        hits.truncate(k);
        Ok(hits)
    }

    /// Row count and graph size (they track each other outside of rebuild
    /// skips).
    pub async fn stats(&self) -> IndexStats {
        let inner = self.inner.lock().await;
        IndexStats {
            indexed_files: inner.updated_at.len(),
            index_size: inner.index.len(),
        }
    }
}

/// Blend similarity with exponential recency decay:
/// adjusted = score * (0.3 + 0.7 * 0.5^(age/H)), H = 30 days.
fn time_weighted_score(score: f32, age_ms: f64) -> f32 {
    let decay = 0.5_f64.powf(age_ms / HALF_LIFE_MS);
    score * (0.3 + 0.7 * decay as f32)
}

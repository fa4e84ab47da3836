// src/conversations/mod.rs
// Content-hash-driven incremental ingestion of chat sessions into
// searchable exchanges.

pub mod parser;

pub use self::parser::{Exchange, RawSession, session_hash};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::index::IndexService;
use crate::store::ObjectStore;

/// Fixed key for the persisted conversation index.
pub const INDEX_KEY: &str = "conversations/index.json";

/// Prefix for per-exchange text objects (the text that gets embedded).
pub const EXCHANGES_PREFIX: &str = "conversations/exchanges/";

/// Prefix for retained raw session payloads.
pub const SESSIONS_PREFIX: &str = "conversations/sessions/";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIndex {
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default)]
    pub session_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub last_updated: String,
}

/// Per-call ingestion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub total_exchanges: usize,
    pub total_sessions: usize,
    pub last_updated: String,
}

/// A conversation search hit: exchange metadata plus similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationHit {
    #[serde(flatten)]
    pub exchange: Exchange,
    pub score: f32,
}

pub struct ConversationIndexer {
    store: Arc<dyn ObjectStore>,
    index: Arc<IndexService>,
    /// Serializes index-blob rewrites.
    lock: Mutex<()>,
}

/// Object path for an exchange id.
fn exchange_path(exchange_id: &str) -> String {
    format!("{EXCHANGES_PREFIX}{exchange_id}.txt")
}

/// Object path for a raw session.
fn session_path(session_id: &str) -> String {
    format!("{SESSIONS_PREFIX}{session_id}.json")
}

/// The text actually embedded for an exchange.
fn exchange_text(exchange: &Exchange) -> String {
    format!(
        "[{}] {}\n\nResponse: {}",
        exchange.project, exchange.user_prompt, exchange.assistant_response
    )
}

impl ConversationIndexer {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<IndexService>) -> Self {
        Self {
            store,
            index,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<ConversationIndex> {
        match self.store.read(INDEX_KEY).await? {
            Some(obj) => Ok(serde_json::from_str(&obj.content)?),
            None => Ok(ConversationIndex::default()),
        }
    }

    async fn save(&self, index: &ConversationIndex) -> Result<()> {
        let blob = serde_json::to_string(index)?;
        self.store.write(INDEX_KEY, &blob).await?;
        Ok(())
    }

    /// Ingest session payloads. Unchanged payloads (by rolling hash) are
    /// skipped; changed sessions have their prior exchanges replaced.
    /// Idempotent for identical input.
    pub async fn index_sessions(&self, sessions: &[serde_json::Value]) -> Result<IndexReport> {
        let _guard = self.lock.lock().await;
        let mut conv_index = self.load().await?;
        let mut report = IndexReport::default();
        let mut dirty = false;

        for payload in sessions {
            let session: RawSession = match serde_json::from_value(payload.clone()) {
                Ok(session) => session,
                Err(e) => {
                    warn!("skipping malformed session payload: {}", e);
                    continue;
                }
            };
            let Some(session_id) = session.session_id.clone() else {
                warn!("skipping session payload without sessionId");
                continue;
            };

            let raw = serde_json::to_string(payload)?;
            let hash = session_hash(&raw);

            if conv_index.session_hashes.get(&session_id) == Some(&hash) {
                report.unchanged += 1;
                continue;
            }
            let is_new = !conv_index.session_hashes.contains_key(&session_id);

            // Drop this session's previous exchanges before re-adding.
            let (stale, kept): (Vec<Exchange>, Vec<Exchange>) = conv_index
                .exchanges
                .drain(..)
                .partition(|e| e.session_id == session_id);
            conv_index.exchanges = kept;
            for exchange in stale {
                let path = exchange_path(&exchange.id);
                self.index.delete(&path).await?;
                self.store.delete(&path).await?;
            }

            let exchanges = parser::parse_exchanges(&session, &session_id);
            for exchange in &exchanges {
                let path = exchange_path(&exchange.id);
                let text = exchange_text(exchange);
                self.store.write(&path, &text).await?;
                self.index.update(&path, &text).await?;
            }
            debug!(session = %session_id, exchanges = exchanges.len(), "session indexed");
            conv_index.exchanges.extend(exchanges);

            conv_index.session_hashes.insert(session_id.clone(), hash);
            // Keep the raw payload for later expansion.
            self.store.write(&session_path(&session_id), &raw).await?;

            if is_new {
                report.added += 1;
            } else {
                report.updated += 1;
            }
            dirty = true;
        }

        if dirty {
            conv_index.last_updated = Utc::now().to_rfc3339();
            self.save(&conv_index).await?;
        }
        Ok(report)
    }

    /// Semantic search over indexed exchanges.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ConversationHit>> {
        let hits = self
            .index
            .search_filtered(query, limit, false, |id| id.starts_with(EXCHANGES_PREFIX))
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let conv_index = self.load().await?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let exchange_id = hit
                .id
                .trim_start_matches(EXCHANGES_PREFIX)
                .trim_end_matches(".txt");
            if let Some(exchange) = conv_index.exchanges.iter().find(|e| e.id == exchange_id) {
                results.push(ConversationHit {
                    exchange: exchange.clone(),
                    score: hit.score,
                });
            }
        }
        Ok(results)
    }

    /// Return a session's exchanges. With `exchange_id`, a ±2 window around
    /// that exchange. Prefers re-parsing the retained raw session; falls
    /// back to the index when the raw payload is gone.
    pub async fn expand(
        &self,
        session_id: &str,
        exchange_id: Option<&str>,
    ) -> Result<Vec<Exchange>> {
        let exchanges = match self.store.read(&session_path(session_id)).await? {
            Some(raw) => {
                let session: RawSession = serde_json::from_str(&raw.content)?;
                parser::parse_exchanges(&session, session_id)
            }
            None => {
                let conv_index = self.load().await?;
                conv_index
                    .exchanges
                    .into_iter()
                    .filter(|e| e.session_id == session_id)
                    .collect()
            }
        };

        let Some(exchange_id) = exchange_id else {
            return Ok(exchanges);
        };
        let Some(center) = exchanges.iter().position(|e| e.id == exchange_id) else {
            return Ok(exchanges);
        };
        let start = center.saturating_sub(2);
        let end = (center + 3).min(exchanges.len());
        Ok(exchanges[start..end].to_vec())
    }

    pub async fn stats(&self) -> Result<ConversationStats> {
        let conv_index = self.load().await?;
        Ok(ConversationStats {
            total_exchanges: conv_index.exchanges.len(),
            total_sessions: conv_index.session_hashes.len(),
            last_updated: conv_index.last_updated,
        })
    }
}

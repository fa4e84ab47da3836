// src/mcp/requests.rs
// Tool argument types. Serde drives validation, schemars drives the
// inputSchema surfaced by tools/list.

use schemars::JsonSchema;
use serde::Deserialize;

use crate::reminders::ReminderKind;

fn default_search_limit() -> usize {
    5
}

fn default_history_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadParams {
    /// Memory file path, e.g. memory/notes.md
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteParams {
    pub path: String,
    /// Full UTF-8 file content
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListParams {
    /// Path prefix to list under; empty lists the root
    #[serde(default)]
    pub prefix: String,
    /// When false, collapse sub-prefixes into directory entries ending in /
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    /// Blend similarity with recency decay
    #[serde(default)]
    pub time_weight: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HistoryParams {
    pub path: String,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RollbackParams {
    pub path: String,
    /// Version to restore, from the history tool
    pub version_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExecuteParams {
    /// Script with access to a read-only `memory` API:
    /// memory.read(path) and memory.list(path?)
    pub script: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchConversationsParams {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IndexConversationsParams {
    /// Raw session payloads: {sessionId, project?, createdAt?, messages: [...]}
    pub sessions: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExpandConversationParams {
    pub session_id: String,
    /// Restrict to a ±2-exchange window around this exchange
    #[serde(default)]
    pub exchange_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleReminderParams {
    /// Upserts by id; omitted means a fresh reminder
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    /// RFC3339 instant for once, 5-field UTC cron expression for cron
    pub expression: String,
    pub description: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RemoveReminderParams {
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplyReflectionParams {
    /// Date of the pending document (YYYY-MM-DD)
    pub date: String,
    /// 1-indexed edit numbers; empty applies all
    #[serde(default)]
    pub edits: Vec<usize>,
    /// Archive the document after a fully successful apply
    #[serde(default)]
    pub archive: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ArchiveReflectionParams {
    /// Date of the pending document (YYYY-MM-DD)
    pub date: String,
}

/// For tools that take no arguments.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EmptyParams {}

// src/mcp/mod.rs
// Tool registry and dispatch. Every tool is a closed enum arm here; the
// HTTP layer stays a thin JSON-RPC shell around this.

pub mod requests;

use std::sync::Arc;

use chrono::Utc;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Value, json};

use crate::conversations::ConversationIndexer;
use crate::error::EngramError;
use crate::index::IndexService;
use crate::reflection::{ReflectionController, ReflectionStaging};
use crate::reminders::{Reminder, ReminderScheduler};
use crate::sandbox::Sandbox;
use crate::store::ObjectStore;
use self::requests::*;

/// A tool as surfaced by tools/list.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Outcome of a tool call: a JSON value plus the error flag that ends up in
/// the MCP result envelope.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub value: Value,
    pub is_error: bool,
}

impl ToolResponse {
    fn ok(value: Value) -> Self {
        Self {
            value,
            is_error: false,
        }
    }

    fn error(value: Value) -> Self {
        Self {
            value,
            is_error: true,
        }
    }
}

/// Request-shape failures that map to JSON-RPC error codes instead of tool
/// results.
#[derive(Debug)]
pub enum DispatchError {
    /// Unknown tool name or malformed arguments (-32602).
    InvalidParams(String),
}

/// All components behind the tool surface.
pub struct EngramServer {
    pub store: Arc<dyn ObjectStore>,
    pub index: Arc<IndexService>,
    pub reminders: Arc<ReminderScheduler>,
    pub conversations: Arc<ConversationIndexer>,
    pub sandbox: Arc<Sandbox>,
    pub staging: Arc<ReflectionStaging>,
    pub reflection: Option<Arc<ReflectionController>>,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

/// The full tool surface, in stable order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read",
            description: "Read a memory file with its current version id",
            input_schema: schema_of::<ReadParams>(),
        },
        ToolDefinition {
            name: "write",
            description: "Write (create or overwrite) a memory file and index it for search",
            input_schema: schema_of::<WriteParams>(),
        },
        ToolDefinition {
            name: "list",
            description: "List memory files under a prefix; non-recursive listings include directory entries ending in /",
            input_schema: schema_of::<ListParams>(),
        },
        ToolDefinition {
            name: "search",
            description: "Semantic search over memory files, optionally time-weighted toward recent files",
            input_schema: schema_of::<SearchParams>(),
        },
        ToolDefinition {
            name: "history",
            description: "List retained versions of a memory file, newest first",
            input_schema: schema_of::<HistoryParams>(),
        },
        ToolDefinition {
            name: "rollback",
            description: "Restore a memory file to a prior version (recorded as a new version)",
            input_schema: schema_of::<RollbackParams>(),
        },
        ToolDefinition {
            name: "execute",
            description: "Run a sandboxed script over a read-only memory API (memory.read / memory.list)",
            input_schema: schema_of::<ExecuteParams>(),
        },
        ToolDefinition {
            name: "search_conversations",
            description: "Semantic search over indexed conversation exchanges",
            input_schema: schema_of::<SearchConversationsParams>(),
        },
        ToolDefinition {
            name: "index_conversations",
            description: "Incrementally index chat session payloads into searchable exchanges",
            input_schema: schema_of::<IndexConversationsParams>(),
        },
        ToolDefinition {
            name: "expand_conversation",
            description: "Return a session's exchanges, or a window around one exchange",
            input_schema: schema_of::<ExpandConversationParams>(),
        },
        ToolDefinition {
            name: "conversation_stats",
            description: "Counts and last-update time of the conversation index",
            input_schema: schema_of::<EmptyParams>(),
        },
        ToolDefinition {
            name: "schedule_reminder",
            description: "Create or update a reminder (one-shot RFC3339 instant, or 5-field UTC cron)",
            input_schema: schema_of::<ScheduleReminderParams>(),
        },
        ToolDefinition {
            name: "list_reminders",
            description: "List all reminders",
            input_schema: schema_of::<EmptyParams>(),
        },
        ToolDefinition {
            name: "remove_reminder",
            description: "Remove a reminder by id",
            input_schema: schema_of::<RemoveReminderParams>(),
        },
        ToolDefinition {
            name: "check_reminders",
            description: "Fire due reminders; cron reminders fire at most once per matching minute",
            input_schema: schema_of::<EmptyParams>(),
        },
        ToolDefinition {
            name: "list_pending_reflections",
            description: "List staged reflection documents awaiting review, newest first",
            input_schema: schema_of::<EmptyParams>(),
        },
        ToolDefinition {
            name: "apply_reflection_changes",
            description: "Apply selected proposed edits from a staged reflection document",
            input_schema: schema_of::<ApplyReflectionParams>(),
        },
        ToolDefinition {
            name: "archive_reflection",
            description: "Move a staged reflection document to the archive",
            input_schema: schema_of::<ArchiveReflectionParams>(),
        },
    ]
}

fn parse_params<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, DispatchError> {
    serde_json::from_value(arguments).map_err(|e| DispatchError::InvalidParams(e.to_string()))
}

/// Map a component failure to the embedded tool-error shape.
fn tool_failure(err: EngramError) -> ToolResponse {
    match err {
        EngramError::Sandbox(details) => ToolResponse::error(json!({
            "error": "Execution failed",
            "details": details,
        })),
        other => ToolResponse::error(json!({ "error": other.to_string() })),
    }
}

impl EngramServer {
    /// Route one tools/call. Unknown names and schema mismatches surface as
    /// DispatchError; everything else lands in the tool result.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResponse, DispatchError> {
        // Callers may omit arguments entirely; treat that as {}.
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        match name {
            "read" => {
                let p: ReadParams = parse_params(arguments)?;
                match self.store.read(&p.path).await {
                    Ok(Some(obj)) => Ok(ToolResponse::ok(json!(obj))),
                    Ok(None) => Ok(ToolResponse::error(json!({
                        "error": format!("File not found: {}", p.path)
                    }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "write" => {
                let p: WriteParams = parse_params(arguments)?;
                let result = async {
                    let receipt = self.store.write(&p.path, &p.content).await?;
                    self.index.update(&p.path, &p.content).await?;
                    Ok::<_, EngramError>(json!({
                        "path": p.path,
                        "size": p.content.len(),
                        "version_id": receipt.version_id,
                    }))
                }
                .await;
                Ok(result.map(ToolResponse::ok).unwrap_or_else(tool_failure))
            }
            "list" => {
                let p: ListParams = parse_params(arguments)?;
                match self.store.list(&p.prefix, p.recursive).await {
                    Ok(entries) => Ok(ToolResponse::ok(json!({ "entries": entries }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "search" => {
                let p: SearchParams = parse_params(arguments)?;
                // Conversation exchanges have their own search tool.
                let result = self
                    .index
                    .search_filtered(&p.query, p.limit, p.time_weight, |id| {
                        !id.starts_with("conversations/")
                    })
                    .await;
                match result {
                    Ok(hits) => {
                        let results: Vec<Value> = hits
                            .iter()
                            .map(|h| json!({ "path": h.id, "score": h.score }))
                            .collect();
                        Ok(ToolResponse::ok(json!({ "results": results })))
                    }
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "history" => {
                let p: HistoryParams = parse_params(arguments)?;
                match self.store.versions(&p.path, p.limit).await {
                    Ok(versions) => Ok(ToolResponse::ok(json!({ "versions": versions }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "rollback" => {
                let p: RollbackParams = parse_params(arguments)?;
                let result = async {
                    let content = self
                        .store
                        .read_version(&p.path, &p.version_id)
                        .await?
                        .ok_or_else(|| {
                            EngramError::NotFound(format!(
                                "version {} of {}",
                                p.version_id, p.path
                            ))
                        })?;
                    let receipt = self.store.write(&p.path, &content).await?;
                    self.index.update(&p.path, &content).await?;
                    Ok::<_, EngramError>(json!({
                        "path": p.path,
                        "restored_version": p.version_id,
                        "version_id": receipt.version_id,
                    }))
                }
                .await;
                Ok(result.map(ToolResponse::ok).unwrap_or_else(tool_failure))
            }
            "execute" => {
                let p: ExecuteParams = parse_params(arguments)?;
                match self.sandbox.execute(&p.script).await {
                    Ok(value) => Ok(ToolResponse::ok(json!({ "result": value }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "search_conversations" => {
                let p: SearchConversationsParams = parse_params(arguments)?;
                match self.conversations.search(&p.query, p.limit).await {
                    Ok(results) => Ok(ToolResponse::ok(json!({ "results": results }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "index_conversations" => {
                let p: IndexConversationsParams = parse_params(arguments)?;
                match self.conversations.index_sessions(&p.sessions).await {
                    Ok(report) => Ok(ToolResponse::ok(json!(report))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "expand_conversation" => {
                let p: ExpandConversationParams = parse_params(arguments)?;
                match self
                    .conversations
                    .expand(&p.session_id, p.exchange_id.as_deref())
                    .await
                {
                    Ok(exchanges) => Ok(ToolResponse::ok(json!({ "exchanges": exchanges }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "conversation_stats" => {
                let _: EmptyParams = parse_params(arguments)?;
                match self.conversations.stats().await {
                    Ok(stats) => Ok(ToolResponse::ok(json!(stats))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "schedule_reminder" => {
                let p: ScheduleReminderParams = parse_params(arguments)?;
                let reminder = Reminder {
                    id: p.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    kind: p.kind,
                    expression: p.expression,
                    description: p.description,
                    payload: p.payload,
                    created_at: Utc::now().to_rfc3339(),
                    last_fired: None,
                };
                match self.reminders.schedule(reminder).await {
                    Ok(reminder) => Ok(ToolResponse::ok(json!({ "reminder": reminder }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "list_reminders" => {
                let _: EmptyParams = parse_params(arguments)?;
                match self.reminders.list().await {
                    Ok(reminders) => Ok(ToolResponse::ok(json!({ "reminders": reminders }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "remove_reminder" => {
                let p: RemoveReminderParams = parse_params(arguments)?;
                match self.reminders.remove(&p.id).await {
                    Ok(removed) => Ok(ToolResponse::ok(json!({ "removed": removed }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "check_reminders" => {
                let _: EmptyParams = parse_params(arguments)?;
                match self.reminders.check().await {
                    Ok(fired) => Ok(ToolResponse::ok(json!({ "fired": fired }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "list_pending_reflections" => {
                let _: EmptyParams = parse_params(arguments)?;
                match self.staging.list_pending().await {
                    Ok(pending) => Ok(ToolResponse::ok(json!({ "pending": pending }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "apply_reflection_changes" => {
                let p: ApplyReflectionParams = parse_params(arguments)?;
                match self.staging.apply(&p.date, &p.edits, p.archive).await {
                    Ok(report) => Ok(ToolResponse::ok(json!(report))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            "archive_reflection" => {
                let p: ArchiveReflectionParams = parse_params(arguments)?;
                match self.staging.archive(&p.date).await {
                    Ok(archived_to) => Ok(ToolResponse::ok(json!({ "archived_to": archived_to }))),
                    Err(e) => Ok(tool_failure(e)),
                }
            }
            other => Err(DispatchError::InvalidParams(format!("unknown tool: {other}"))),
        }
    }
}

// src/reflection/tools.rs
// Tool schemas exposed to the reflection models, and the closed sum type
// their calls are parsed into.

use serde::Deserialize;
use serde_json::json;

use super::{EditAction, FixType};
use crate::llm::{Tool, ToolCall};

/// Every tool call a reflection model can make, across both phases.
#[derive(Debug, Clone, PartialEq)]
pub enum ReflectionTool {
    ListFiles {
        path: String,
        recursive: bool,
    },
    ReadFile {
        path: String,
    },
    SearchMemory {
        query: String,
        limit: usize,
    },
    AutoApply {
        path: String,
        fix_type: FixType,
        old_text: Option<String>,
        new_text: Option<String>,
        reason: String,
    },
    FlagForDeepAnalysis {
        path: String,
        issue: String,
    },
    ProposeEdit {
        path: String,
        action: EditAction,
        content: Option<String>,
        reason: String,
    },
    FinishQuickScan {
        auto_applied: usize,
        flagged_for_deep_analysis: usize,
    },
    FinishReflection {
        summary: String,
        proposed_changes: usize,
        auto_applied: usize,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesArgs {
    #[serde(default)]
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Deserialize)]
struct SearchMemoryArgs {
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    5
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoApplyArgs {
    path: String,
    fix_type: FixType,
    #[serde(default)]
    old_text: Option<String>,
    #[serde(default)]
    new_text: Option<String>,
    reason: String,
}

#[derive(Deserialize)]
struct FlagArgs {
    path: String,
    issue: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposeEditArgs {
    path: String,
    action: EditAction,
    #[serde(default)]
    content: Option<String>,
    reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishQuickScanArgs {
    #[serde(default)]
    auto_applied: usize,
    #[serde(default)]
    flagged_for_deep_analysis: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishReflectionArgs {
    summary: String,
    #[serde(default)]
    proposed_changes: usize,
    #[serde(default)]
    auto_applied: usize,
}

impl ReflectionTool {
    /// Parse a model tool call. Unknown names and malformed arguments are
    /// reported back to the model as strings, never as process errors.
    pub fn parse(call: &ToolCall) -> Result<Self, String> {
        let name = call.function.name.as_str();
        let args = call.function.arguments.as_str();
        let bad = |e: serde_json::Error| format!("invalid arguments for {name}: {e}");

        match name {
            "listFiles" => {
                let a: ListFilesArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::ListFiles {
                    path: a.path,
                    recursive: a.recursive,
                })
            }
            "readFile" => {
                let a: ReadFileArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::ReadFile { path: a.path })
            }
            "searchMemory" => {
                let a: SearchMemoryArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::SearchMemory {
                    query: a.query,
                    limit: a.limit,
                })
            }
            "autoApply" => {
                let a: AutoApplyArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::AutoApply {
                    path: a.path,
                    fix_type: a.fix_type,
                    old_text: a.old_text,
                    new_text: a.new_text,
                    reason: a.reason,
                })
            }
            "flagForDeepAnalysis" => {
                let a: FlagArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::FlagForDeepAnalysis {
                    path: a.path,
                    issue: a.issue,
                })
            }
            "proposeEdit" => {
                let a: ProposeEditArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::ProposeEdit {
                    path: a.path,
                    action: a.action,
                    content: a.content,
                    reason: a.reason,
                })
            }
            "finishQuickScan" => {
                let a: FinishQuickScanArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::FinishQuickScan {
                    auto_applied: a.auto_applied,
                    flagged_for_deep_analysis: a.flagged_for_deep_analysis,
                })
            }
            "finishReflection" => {
                let a: FinishReflectionArgs = serde_json::from_str(args).map_err(bad)?;
                Ok(Self::FinishReflection {
                    summary: a.summary,
                    proposed_changes: a.proposed_changes,
                    auto_applied: a.auto_applied,
                })
            }
            other => Err(format!("unknown tool: {other}")),
        }
    }

    /// Whether this call terminates its phase.
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::FinishQuickScan { .. } | Self::FinishReflection { .. })
    }
}

fn list_files_tool() -> Tool {
    Tool::function(
        "listFiles",
        "List memory files under a path prefix",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path prefix, e.g. memory/"},
                "recursive": {"type": "boolean"}
            }
        }),
    )
}

fn read_file_tool() -> Tool {
    Tool::function(
        "readFile",
        "Read a memory file",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"}
            },
            "required": ["path"]
        }),
    )
}

fn auto_apply_tool() -> Tool {
    Tool::function(
        "autoApply",
        "Immediately apply a mechanically-safe fix (typos, whitespace, trailing newline, duplicated text, formatting). \
         typo/whitespace/formatting require oldText and newText; duplicate requires oldText.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "fixType": {"type": "string", "enum": ["typo", "whitespace", "newline", "duplicate", "formatting"]},
                "oldText": {"type": "string"},
                "newText": {"type": "string"},
                "reason": {"type": "string"}
            },
            "required": ["path", "fixType", "reason"]
        }),
    )
}

/// Tool schema for Phase A (quick scan).
pub fn quick_scan_tools() -> Vec<Tool> {
    vec![
        list_files_tool(),
        read_file_tool(),
        auto_apply_tool(),
        Tool::function(
            "flagForDeepAnalysis",
            "Flag a file that needs non-mechanical attention in the deep-analysis phase",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "issue": {"type": "string"}
                },
                "required": ["path", "issue"]
            }),
        ),
        Tool::function(
            "finishQuickScan",
            "Finish the quick scan, reporting how many fixes were applied and how many issues were flagged",
            json!({
                "type": "object",
                "properties": {
                    "autoApplied": {"type": "integer"},
                    "flaggedForDeepAnalysis": {"type": "integer"}
                }
            }),
        ),
    ]
}

/// Tool schema for Phase B (deep analysis).
pub fn deep_analysis_tools() -> Vec<Tool> {
    vec![
        Tool::function(
            "searchMemory",
            "Semantic search over memory files",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            }),
        ),
        read_file_tool(),
        list_files_tool(),
        Tool::function(
            "proposeEdit",
            "Stage an edit for human review. Does not modify any file. \
             replace/append/create require content.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "action": {"type": "string", "enum": ["replace", "append", "delete", "create"]},
                    "content": {"type": "string"},
                    "reason": {"type": "string"}
                },
                "required": ["path", "action", "reason"]
            }),
        ),
        auto_apply_tool(),
        Tool::function(
            "finishReflection",
            "Finish the reflection with a summary of what was found and proposed",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "proposedChanges": {"type": "integer"},
                    "autoApplied": {"type": "integer"}
                },
                "required": ["summary"]
            }),
        ),
    ]
}

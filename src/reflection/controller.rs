// src/reflection/controller.rs
// Two-phase agentic reflection loop: a quick scan with the fast model that
// auto-applies mechanical fixes, then a deep analysis with the primary
// model that stages everything else for review.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::staging::ReflectionStaging;
use super::tools::{ReflectionTool, deep_analysis_tools, quick_scan_tools};
use super::{
    AutoAppliedFix, EditAction, FixType, FlaggedIssue, LAST_REFLECTION_KEY, LastReflection,
    ProposedEdit, StagedReflection,
};
use crate::index::IndexService;
use crate::llm::{LlmClient, Message, Tool};
use crate::notify::WebhookNotifier;
use crate::store::ObjectStore;

/// Turn cap for the quick scan (Phase A).
pub const MAX_QUICK_SCAN: usize = 5;

/// Turn cap for the deep analysis (Phase B).
pub const MAX_DEEP_ANALYSIS: usize = 10;

/// Free-text fallback summaries are clipped to this length.
const SUMMARY_CAP: usize = 500;

const QUICK_SCAN_SYSTEM: &str = "You maintain a memory store of markdown notes for an AI coding \
assistant. In this pass you only make mechanically-safe fixes: typos, stray whitespace, missing \
trailing newlines, duplicated fragments, and formatting slips. Anything needing judgment gets \
flagged for deep analysis instead. Call finishQuickScan when done.";

const DEEP_ANALYSIS_SYSTEM: &str = "You maintain a memory store of markdown notes for an AI \
coding assistant. Look for notes that should be merged, split, rewritten, or deleted, and stage \
every such change with proposeEdit for human review; nothing you propose is applied directly. \
Call finishReflection with a summary when done.";

/// Result of one reflection run, including partial state on failure.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticReflectionResult {
    pub success: bool,
    pub summary: String,
    pub proposed_edits: Vec<ProposedEdit>,
    pub auto_applied_fixes: Vec<AutoAppliedFix>,
    pub flagged_issues: Vec<FlaggedIssue>,
    pub quick_scan_iterations: usize,
    pub deep_analysis_iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_path: Option<String>,
}

/// Accumulated state across both phases.
#[derive(Default)]
struct ReflectionState {
    auto_applied_fixes: Vec<AutoAppliedFix>,
    flagged_issues: Vec<FlaggedIssue>,
    proposed_edits: Vec<ProposedEdit>,
    summary: Option<String>,
}

/// How a phase loop ended.
enum PhaseOutcome {
    /// The finish tool was called.
    Finished,
    /// The model answered without tool calls; carries its free text.
    NoToolCalls(Option<String>),
    /// The turn cap was reached.
    Capped,
}

pub struct ReflectionController {
    store: Arc<dyn ObjectStore>,
    index: Arc<IndexService>,
    staging: ReflectionStaging,
    fast: Arc<dyn LlmClient>,
    primary: Arc<dyn LlmClient>,
    notifier: Option<Arc<WebhookNotifier>>,
}

impl ReflectionController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<IndexService>,
        fast: Arc<dyn LlmClient>,
        primary: Arc<dyn LlmClient>,
        notifier: Option<Arc<WebhookNotifier>>,
    ) -> Self {
        let staging = ReflectionStaging::new(store.clone(), index.clone());
        Self {
            store,
            index,
            staging,
            fast,
            primary,
            notifier,
        }
    }

    /// Run both phases, stage the outcome, persist the last-reflection
    /// marker, and notify if anything actionable came out.
    pub async fn run(&self) -> AgenticReflectionResult {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let mut result = self.run_phases().await;

        if result.proposed_edits.is_empty() {
            info!("reflection produced no proposed edits; nothing staged");
        } else {
            let staged = StagedReflection {
                date: date.clone(),
                summary: result.summary.clone(),
                proposed_edits: result.proposed_edits.clone(),
                auto_applied_fixes: result.auto_applied_fixes.clone(),
                flagged_issues: result.flagged_issues.clone(),
                quick_scan_iterations: result.quick_scan_iterations,
                deep_analysis_iterations: result.deep_analysis_iterations,
            };
            match self.staging.write_staged(&staged).await {
                Ok(path) => result.staged_path = Some(path),
                Err(e) => warn!("failed to write staged reflection: {}", e),
            }
        }

        // The marker is written even for failed or empty runs.
        let marker = LastReflection {
            timestamp: Utc::now().to_rfc3339(),
            date,
        };
        if let Ok(blob) = serde_json::to_string(&marker) {
            if let Err(e) = self.store.write(LAST_REFLECTION_KEY, &blob).await {
                warn!("failed to write last-reflection marker: {}", e);
            }
        }

        let actionable =
            !result.proposed_edits.is_empty() || !result.auto_applied_fixes.is_empty();
        if actionable {
            if let Some(notifier) = &self.notifier {
                notifier
                    .send(&format!(
                        "Reflection: {} fix(es) auto-applied, {} edit(s) staged for review. {}",
                        result.auto_applied_fixes.len(),
                        result.proposed_edits.len(),
                        result.summary
                    ))
                    .await;
            }
        }

        result
    }

    async fn run_phases(&self) -> AgenticReflectionResult {
        let mut state = ReflectionState::default();
        let mut quick_scan_iterations = 0;
        let mut deep_analysis_iterations = 0;

        // Phase A: quick scan with the fast model.
        let mut messages = vec![
            Message::system(QUICK_SCAN_SYSTEM),
            Message::user(
                "Scan the memory files under memory/ for mechanical problems. Apply safe fixes \
                 with autoApply and flag anything that needs real judgment.",
            ),
        ];
        if let Err(e) = self
            .run_phase(
                self.fast.as_ref(),
                quick_scan_tools(),
                &mut messages,
                MAX_QUICK_SCAN,
                &mut state,
                &mut quick_scan_iterations,
            )
            .await
        {
            return finish_result(
                state,
                quick_scan_iterations,
                deep_analysis_iterations,
                Some(format!("Quick scan failed: {e}")),
            );
        }

        // Phase B: deep analysis with the primary model, seeded with the
        // quick scan's findings.
        let flagged = if state.flagged_issues.is_empty() {
            "none".to_string()
        } else {
            state
                .flagged_issues
                .iter()
                .map(|f| format!("- {}: {}", f.path, f.issue))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let mut messages = vec![
            Message::system(DEEP_ANALYSIS_SYSTEM),
            Message::user(format!(
                "Analyze the memory store for consolidation and cleanup opportunities.\n\n\
                 Issues flagged during the quick scan:\n{}\n\n\
                 {} mechanical fix(es) were already auto-applied this run.",
                flagged,
                state.auto_applied_fixes.len()
            )),
        ];
        let outcome = match self
            .run_phase(
                self.primary.as_ref(),
                deep_analysis_tools(),
                &mut messages,
                MAX_DEEP_ANALYSIS,
                &mut state,
                &mut deep_analysis_iterations,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return finish_result(
                    state,
                    quick_scan_iterations,
                    deep_analysis_iterations,
                    Some(format!("Deep analysis failed: {e}")),
                );
            }
        };

        if state.summary.is_none() {
            state.summary = match outcome {
                PhaseOutcome::NoToolCalls(Some(text)) => Some(truncate_chars(&text, SUMMARY_CAP)),
                PhaseOutcome::Capped => Some(format!(
                    "Reflection stopped at the {MAX_DEEP_ANALYSIS}-turn cap with {} edit(s) \
                     proposed and {} fix(es) applied.",
                    state.proposed_edits.len(),
                    state.auto_applied_fixes.len()
                )),
                _ => None,
            };
        }

        finish_result(state, quick_scan_iterations, deep_analysis_iterations, None)
    }

    /// One phase of the tool-calling loop. Executes tool calls in order,
    /// appending each result to the message trail. Terminates on the finish
    /// tool, on a turn without tool calls, or at the cap.
    async fn run_phase(
        &self,
        client: &dyn LlmClient,
        tools: Vec<Tool>,
        messages: &mut Vec<Message>,
        max_turns: usize,
        state: &mut ReflectionState,
        iterations: &mut usize,
    ) -> Result<PhaseOutcome, String> {
        while *iterations < max_turns {
            *iterations += 1;

            let result = client
                .chat(messages.clone(), Some(tools.clone()))
                .await
                .map_err(|e| e.to_string())?;

            let Some(tool_calls) = result.tool_calls.filter(|calls| !calls.is_empty()) else {
                return Ok(PhaseOutcome::NoToolCalls(result.content));
            };

            let mut assistant = Message::assistant(result.content.clone());
            assistant.tool_calls = Some(tool_calls.clone());
            messages.push(assistant);

            let mut finished = false;
            for call in &tool_calls {
                let output = match ReflectionTool::parse(call) {
                    Ok(tool) => {
                        if tool.is_finish() {
                            finished = true;
                        }
                        self.execute_tool(state, tool).await
                    }
                    Err(e) => e,
                };
                messages.push(Message::tool_result(&call.id, output));
            }

            if finished {
                return Ok(PhaseOutcome::Finished);
            }
        }

        Ok(PhaseOutcome::Capped)
    }

    /// Execute one parsed tool call. Failures become strings in the message
    /// trail, never process errors.
    async fn execute_tool(&self, state: &mut ReflectionState, tool: ReflectionTool) -> String {
        match tool {
            ReflectionTool::ListFiles { path, recursive } => {
                match self.store.list(&path, recursive).await {
                    Ok(entries) => serde_json::to_string(&entries)
                        .unwrap_or_else(|e| format!("listing failed: {e}")),
                    Err(e) => format!("listing failed: {e}"),
                }
            }
            ReflectionTool::ReadFile { path } => match self.store.read(&path).await {
                Ok(Some(obj)) => obj.content,
                Ok(None) => format!("File not found: {path}"),
                Err(e) => format!("read failed: {e}"),
            },
            ReflectionTool::SearchMemory { query, limit } => {
                let result = self
                    .index
                    .search_filtered(&query, limit, false, |id| {
                        !id.starts_with("conversations/")
                    })
                    .await;
                match result {
                    Ok(hits) => {
                        let rows: Vec<String> = hits
                            .iter()
                            .map(|h| format!("{} (score {:.2})", h.id, h.score))
                            .collect();
                        if rows.is_empty() {
                            "no matches".to_string()
                        } else {
                            rows.join("\n")
                        }
                    }
                    Err(e) => format!("search failed: {e}"),
                }
            }
            ReflectionTool::AutoApply {
                path,
                fix_type,
                old_text,
                new_text,
                reason,
            } => match self.apply_fix(&path, fix_type, old_text, new_text).await {
                Ok(changed) => {
                    state.auto_applied_fixes.push(AutoAppliedFix {
                        path: path.clone(),
                        fix_type,
                        reason,
                    });
                    if changed {
                        format!("Applied {} fix to {}", fix_type.as_str(), path)
                    } else {
                        format!("No change needed in {path} (content already clean)")
                    }
                }
                Err(e) => format!("Auto-apply failed: {e}"),
            },
            ReflectionTool::FlagForDeepAnalysis { path, issue } => {
                state.flagged_issues.push(FlaggedIssue {
                    path: path.clone(),
                    issue,
                });
                format!("Flagged {path} for deep analysis")
            }
            ReflectionTool::ProposeEdit {
                path,
                action,
                content,
                reason,
            } => {
                if action.requires_content() && content.is_none() {
                    return format!("Edit rejected: {} requires content", action.as_str());
                }
                if action != EditAction::Create {
                    match self.store.read(&path).await {
                        Ok(Some(_)) => {}
                        Ok(None) => return format!("Edit rejected: {path} does not exist"),
                        Err(e) => return format!("Edit rejected: {e}"),
                    }
                }
                state.proposed_edits.push(ProposedEdit {
                    path: path.clone(),
                    action,
                    content,
                    reason,
                });
                format!("Edit staged for review: {} {}", action.as_str(), path)
            }
            ReflectionTool::FinishQuickScan {
                auto_applied,
                flagged_for_deep_analysis,
            } => {
                info!(
                    auto_applied,
                    flagged = flagged_for_deep_analysis,
                    "quick scan complete"
                );
                "Quick scan complete.".to_string()
            }
            ReflectionTool::FinishReflection { summary, .. } => {
                state.summary = Some(summary);
                "Reflection complete.".to_string()
            }
        }
    }

    /// Mechanical fix rules. Returns Ok(true) when the file was rewritten,
    /// Ok(false) when the content was already in the target state.
    async fn apply_fix(
        &self,
        path: &str,
        fix_type: FixType,
        old_text: Option<String>,
        new_text: Option<String>,
    ) -> Result<bool, String> {
        let obj = self
            .store
            .read(path)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("file not found: {path}"))?;
        let content = obj.content;

        let new_content = match fix_type {
            FixType::Typo | FixType::Whitespace | FixType::Formatting => {
                let old = old_text
                    .ok_or_else(|| format!("{} fix requires oldText", fix_type.as_str()))?;
                let new = new_text
                    .ok_or_else(|| format!("{} fix requires newText", fix_type.as_str()))?;
                if !content.contains(&old) {
                    return Err(format!("oldText not found in {path}"));
                }
                content.replacen(&old, &new, 1)
            }
            FixType::Newline => format!("{}\n", content.trim_end()),
            FixType::Duplicate => {
                let old = old_text.ok_or_else(|| "duplicate fix requires oldText".to_string())?;
                content.replacen(&old, new_text.as_deref().unwrap_or(""), 1)
            }
        };

        if new_content == content {
            return Ok(false);
        }

        self.store
            .write(path, &new_content)
            .await
            .map_err(|e| e.to_string())?;
        self.index
            .update(path, &new_content)
            .await
            .map_err(|e| e.to_string())?;
        Ok(true)
    }
}

fn finish_result(
    state: ReflectionState,
    quick_scan_iterations: usize,
    deep_analysis_iterations: usize,
    error: Option<String>,
) -> AgenticReflectionResult {
    let success = error.is_none();
    let summary = state.summary.unwrap_or_else(|| {
        error
            .clone()
            .unwrap_or_else(|| "Reflection completed without findings.".to_string())
    });
    AgenticReflectionResult {
        success,
        summary,
        proposed_edits: state.proposed_edits,
        auto_applied_fixes: state.auto_applied_fixes,
        flagged_issues: state.flagged_issues,
        quick_scan_iterations,
        deep_analysis_iterations,
        error,
        staged_path: None,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabasePool;
    use crate::embeddings::EmbeddingClient;
    use crate::llm::{ChatResult, FunctionCall, ToolCall};
    use crate::store::{MemoryObjectStore, ObjectStore};
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// LLM double that replays canned turns.
    struct ScriptedLlm {
        turns: Mutex<VecDeque<ChatResult>>,
        fail: bool,
    }

    impl ScriptedLlm {
        fn new(turns: Vec<ChatResult>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(VecDeque::new()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Option<Vec<Tool>>,
        ) -> AnyResult<ChatResult> {
            if self.fail {
                anyhow::bail!("model unavailable");
            }
            Ok(self.turns.lock().await.pop_front().unwrap_or(ChatResult {
                content: Some("nothing further".into()),
                tool_calls: None,
            }))
        }

        fn model_name(&self) -> String {
            "scripted".into()
        }
    }

    fn tool_turn(calls: Vec<(&str, serde_json::Value)>) -> ChatResult {
        ChatResult {
            content: None,
            tool_calls: Some(
                calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, args))| ToolCall {
                        id: format!("call_{i}"),
                        call_type: "function".into(),
                        function: FunctionCall {
                            name: name.into(),
                            arguments: args.to_string(),
                        },
                    })
                    .collect(),
            ),
        }
    }

    async fn harness() -> (Arc<MemoryObjectStore>, Arc<IndexService>) {
        let store = Arc::new(MemoryObjectStore::new());
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("pool"));
        let embedder = Arc::new(EmbeddingClient::hashed(32));
        let index = Arc::new(IndexService::open(pool, embedder).await.expect("index"));
        (store, index)
    }

    fn controller(
        store: Arc<MemoryObjectStore>,
        index: Arc<IndexService>,
        fast: Arc<dyn LlmClient>,
        primary: Arc<dyn LlmClient>,
    ) -> ReflectionController {
        ReflectionController::new(store, index, fast, primary, None)
    }

    #[tokio::test]
    async fn test_end_to_end_reflection() {
        let (store, index) = harness().await;
        store
            .write("memory/a.md", "this is a tset of the system")
            .await
            .unwrap();
        store.write("memory/x.md", "duplicated notes").await.unwrap();

        let fast = ScriptedLlm::new(vec![
            tool_turn(vec![(
                "autoApply",
                serde_json::json!({
                    "path": "memory/a.md",
                    "fixType": "typo",
                    "oldText": "tset",
                    "newText": "test",
                    "reason": "typo"
                }),
            )]),
            tool_turn(vec![(
                "finishQuickScan",
                serde_json::json!({"autoApplied": 1, "flaggedForDeepAnalysis": 0}),
            )]),
        ]);
        let primary = ScriptedLlm::new(vec![
            tool_turn(vec![(
                "proposeEdit",
                serde_json::json!({
                    "path": "memory/x.md",
                    "action": "replace",
                    "content": "merged notes",
                    "reason": "merge duplicates"
                }),
            )]),
            tool_turn(vec![(
                "finishReflection",
                serde_json::json!({"summary": "done", "proposedChanges": 1, "autoApplied": 1}),
            )]),
        ]);

        let result = controller(store.clone(), index, fast, primary).run().await;

        assert!(result.success);
        assert_eq!(result.summary, "done");
        assert_eq!(result.auto_applied_fixes.len(), 1);
        assert_eq!(result.proposed_edits.len(), 1);
        assert_eq!(result.quick_scan_iterations, 2);
        assert_eq!(result.deep_analysis_iterations, 2);

        // The typo fix is applied to the file; the proposed edit is not.
        let fixed = store.read("memory/a.md").await.unwrap().unwrap();
        assert_eq!(fixed.content, "this is a test of the system");
        let untouched = store.read("memory/x.md").await.unwrap().unwrap();
        assert_eq!(untouched.content, "duplicated notes");

        // A pending staged document exists for today.
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let staged_path = result.staged_path.expect("staged path");
        assert_eq!(staged_path, format!("memory/reflections/pending/{today}.md"));
        let staged = store.read(&staged_path).await.unwrap().unwrap();
        assert!(staged.content.contains("merge duplicates"));

        // The marker is persisted.
        let marker = store.read(LAST_REFLECTION_KEY).await.unwrap().unwrap();
        let marker: LastReflection = serde_json::from_str(&marker.content).unwrap();
        assert_eq!(marker.date, today);
    }

    #[tokio::test]
    async fn test_auto_apply_rules() {
        let (store, index) = harness().await;
        store.write("memory/a.md", "alpha beta alpha").await.unwrap();
        store.write("memory/b.md", "trailing   \n\n\n").await.unwrap();
        let ctl = controller(
            store.clone(),
            index,
            ScriptedLlm::new(vec![]),
            ScriptedLlm::new(vec![]),
        );

        // typo requires oldText present in the file
        let err = ctl
            .apply_fix("memory/a.md", FixType::Typo, Some("gamma".into()), Some("g".into()))
            .await
            .unwrap_err();
        assert!(err.contains("not found"));

        // first occurrence only
        ctl.apply_fix(
            "memory/a.md",
            FixType::Typo,
            Some("alpha".into()),
            Some("ALPHA".into()),
        )
        .await
        .unwrap();
        assert_eq!(
            store.read("memory/a.md").await.unwrap().unwrap().content,
            "ALPHA beta alpha"
        );

        // newline normalizes the tail
        ctl.apply_fix("memory/b.md", FixType::Newline, None, None)
            .await
            .unwrap();
        assert_eq!(
            store.read("memory/b.md").await.unwrap().unwrap().content,
            "trailing\n"
        );
        // idempotent: second application is a skipped write
        let changed = ctl
            .apply_fix("memory/b.md", FixType::Newline, None, None)
            .await
            .unwrap();
        assert!(!changed);

        // duplicate removes the first occurrence when newText is empty
        ctl.apply_fix(
            "memory/a.md",
            FixType::Duplicate,
            Some(" beta".into()),
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            store.read("memory/a.md").await.unwrap().unwrap().content,
            "ALPHA alpha"
        );

        // missing file
        assert!(
            ctl.apply_fix("memory/nope.md", FixType::Newline, None, None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_propose_edit_validation() {
        let (store, index) = harness().await;
        store.write("memory/exists.md", "content here").await.unwrap();
        let ctl = controller(
            store.clone(),
            index,
            ScriptedLlm::new(vec![]),
            ScriptedLlm::new(vec![]),
        );
        let mut state = ReflectionState::default();

        // Missing target file.
        let msg = ctl
            .execute_tool(
                &mut state,
                ReflectionTool::ProposeEdit {
                    path: "memory/nope.md".into(),
                    action: EditAction::Replace,
                    content: Some("x".into()),
                    reason: "r".into(),
                },
            )
            .await;
        assert!(msg.contains("does not exist"));

        // Missing content.
        let msg = ctl
            .execute_tool(
                &mut state,
                ReflectionTool::ProposeEdit {
                    path: "memory/exists.md".into(),
                    action: EditAction::Append,
                    content: None,
                    reason: "r".into(),
                },
            )
            .await;
        assert!(msg.contains("requires content"));

        // Create is allowed for new paths; delete needs no content.
        ctl.execute_tool(
            &mut state,
            ReflectionTool::ProposeEdit {
                path: "memory/new.md".into(),
                action: EditAction::Create,
                content: Some("x".into()),
                reason: "r".into(),
            },
        )
        .await;
        ctl.execute_tool(
            &mut state,
            ReflectionTool::ProposeEdit {
                path: "memory/exists.md".into(),
                action: EditAction::Delete,
                content: None,
                reason: "r".into(),
            },
        )
        .await;
        assert_eq!(state.proposed_edits.len(), 2);
        // Nothing was written by staging-only proposals.
        assert!(store.read("memory/new.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_tool_calls_uses_free_text_summary() {
        let (store, index) = harness().await;
        let fast = ScriptedLlm::new(vec![tool_turn(vec![(
            "finishQuickScan",
            serde_json::json!({}),
        )])]);
        // Primary answers in prose immediately.
        let primary = ScriptedLlm::new(vec![ChatResult {
            content: Some("Everything looks tidy already.".into()),
            tool_calls: None,
        }]);

        let result = controller(store, index, fast, primary).run().await;
        assert!(result.success);
        assert_eq!(result.summary, "Everything looks tidy already.");
        assert_eq!(result.deep_analysis_iterations, 1);
        assert!(result.staged_path.is_none());
    }

    #[tokio::test]
    async fn test_iteration_cap_synthesizes_summary() {
        let (store, index) = harness().await;
        let fast = ScriptedLlm::new(vec![tool_turn(vec![(
            "finishQuickScan",
            serde_json::json!({}),
        )])]);
        // Primary lists files forever; the cap must stop it.
        let list_forever: Vec<ChatResult> = (0..MAX_DEEP_ANALYSIS + 5)
            .map(|_| tool_turn(vec![("listFiles", serde_json::json!({}))]))
            .collect();
        let primary = ScriptedLlm::new(list_forever);

        let result = controller(store, index, fast, primary).run().await;
        assert!(result.success);
        assert_eq!(result.deep_analysis_iterations, MAX_DEEP_ANALYSIS);
        assert!(result.summary.contains("cap"));
    }

    #[tokio::test]
    async fn test_phase_failure_returns_partial_state() {
        let (store, index) = harness().await;
        store.write("memory/a.md", "a tset here").await.unwrap();

        // Fast applies one fix then the model dies in phase B.
        let fast = ScriptedLlm::new(vec![
            tool_turn(vec![(
                "autoApply",
                serde_json::json!({
                    "path": "memory/a.md",
                    "fixType": "typo",
                    "oldText": "tset",
                    "newText": "test",
                    "reason": "typo"
                }),
            )]),
            tool_turn(vec![("finishQuickScan", serde_json::json!({}))]),
        ]);
        let primary = ScriptedLlm::failing();

        let result = controller(store, index, fast, primary).run().await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("Deep analysis failed"));
        // Partial state from the quick scan survives.
        assert_eq!(result.auto_applied_fixes.len(), 1);
        assert_eq!(result.quick_scan_iterations, 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_not_fatal() {
        let (store, index) = harness().await;
        let fast = ScriptedLlm::new(vec![
            tool_turn(vec![("deleteEverything", serde_json::json!({}))]),
            tool_turn(vec![("finishQuickScan", serde_json::json!({}))]),
        ]);
        let primary = ScriptedLlm::new(vec![tool_turn(vec![(
            "finishReflection",
            serde_json::json!({"summary": "ok"}),
        )])]);

        let result = controller(store, index, fast, primary).run().await;
        assert!(result.success);
        assert_eq!(result.quick_scan_iterations, 2);
    }
}

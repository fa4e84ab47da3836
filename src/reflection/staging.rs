// src/reflection/staging.rs
// Builds, parses, archives, and applies reflection staging documents.
//
// The document format is deterministic so proposed edits can be parsed back
// out of the markdown exactly as they were staged. Content payloads sit in
// four-backtick fences, which keeps ordinary markdown (including three-
// backtick code blocks) intact inside them.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::{
    ARCHIVE_PREFIX, EditAction, PENDING_PREFIX, ProposedEdit, StagedReflection,
};
use crate::error::{EngramError, Result};
use crate::index::IndexService;
use crate::store::ObjectStore;

const CONTENT_FENCE: &str = "````";

/// Result of applying staged edits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub errors: Vec<String>,
    pub archived: bool,
}

pub struct ReflectionStaging {
    store: Arc<dyn ObjectStore>,
    index: Arc<IndexService>,
}

/// Path of a pending document for a date.
pub fn pending_path(date: &str) -> String {
    format!("{PENDING_PREFIX}{date}.md")
}

/// Path of an archived document for a date.
pub fn archive_path(date: &str) -> String {
    format!("{ARCHIVE_PREFIX}{date}.md")
}

/// Render the staged reflection to markdown. Section order is fixed:
/// header, summary, statistics, auto-applied fixes, proposed changes,
/// unresolved flagged issues, after-review instructions.
pub fn build_document(staged: &StagedReflection) -> String {
    let mut doc = String::new();

    doc.push_str(&format!("# Reflection — {}\n\n", staged.date));

    doc.push_str("## Summary\n\n");
    doc.push_str(staged.summary.trim());
    doc.push_str("\n\n");

    doc.push_str("## Statistics\n\n");
    doc.push_str("| Metric | Value |\n|--------|-------|\n");
    doc.push_str(&format!(
        "| Quick-scan iterations | {} |\n",
        staged.quick_scan_iterations
    ));
    doc.push_str(&format!(
        "| Deep-analysis iterations | {} |\n",
        staged.deep_analysis_iterations
    ));
    doc.push_str(&format!(
        "| Auto-applied fixes | {} |\n",
        staged.auto_applied_fixes.len()
    ));
    doc.push_str(&format!("| Proposed edits | {} |\n", staged.proposed_edits.len()));
    doc.push_str(&format!("| Flagged issues | {} |\n\n", staged.flagged_issues.len()));

    doc.push_str("## Auto-Applied Fixes\n\n");
    if staged.auto_applied_fixes.is_empty() {
        doc.push_str("None.\n\n");
    } else {
        for fix in &staged.auto_applied_fixes {
            doc.push_str(&format!(
                "- `{}` ({}): {}\n",
                fix.path,
                fix.fix_type.as_str(),
                single_line(&fix.reason)
            ));
        }
        doc.push('\n');
    }

    doc.push_str("## Proposed Changes\n\n");
    if staged.proposed_edits.is_empty() {
        doc.push_str("None.\n\n");
    } else {
        for (i, edit) in staged.proposed_edits.iter().enumerate() {
            doc.push_str(&format!(
                "### {}. {} `{}`\n\n",
                i + 1,
                edit.action.as_str(),
                edit.path
            ));
            doc.push_str(&format!("Reason: {}\n\n", single_line(&edit.reason)));
            if let Some(content) = &edit.content {
                doc.push_str(&format!("Content:\n\n{CONTENT_FENCE}\n{content}\n{CONTENT_FENCE}\n\n"));
            }
        }
    }

    // Only issues not already addressed by a proposed edit.
    let unresolved: Vec<_> = staged
        .flagged_issues
        .iter()
        .filter(|issue| !staged.proposed_edits.iter().any(|e| e.path == issue.path))
        .collect();
    doc.push_str("## Unresolved Flagged Issues\n\n");
    if unresolved.is_empty() {
        doc.push_str("None.\n\n");
    } else {
        for issue in unresolved {
            doc.push_str(&format!("- `{}`: {}\n", issue.path, single_line(&issue.issue)));
        }
        doc.push('\n');
    }

    doc.push_str("## After Review\n\n");
    doc.push_str(&format!(
        "Apply selected edits with `apply_reflection_changes` (date `{}`, 1-indexed edit numbers), \
         or archive this document unchanged with `archive_reflection`.\n",
        staged.date
    ));

    doc
}

/// Parse proposed edits back out of a staging document. Exact inverse of
/// `build_document` for the proposed-changes section.
pub fn parse_edits(document: &str) -> Vec<ProposedEdit> {
    let mut edits = Vec::new();
    let mut lines = document.lines().peekable();

    // Skip ahead to the proposed-changes section.
    for line in lines.by_ref() {
        if line.trim() == "## Proposed Changes" {
            break;
        }
    }

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.starts_with("## ") {
            break; // next section
        }
        let Some(rest) = trimmed.strip_prefix("### ") else {
            continue;
        };
        // "N. action `path`"
        let Some((_, header)) = rest.split_once(". ") else {
            continue;
        };
        let Some((action_str, path_part)) = header.split_once(' ') else {
            continue;
        };
        let Some(action) = EditAction::parse(action_str) else {
            continue;
        };
        let path = path_part.trim().trim_matches('`').to_string();

        let mut reason = String::new();
        let mut content: Option<String> = None;

        while let Some(peeked) = lines.peek() {
            let peeked_trimmed = peeked.trim();
            if peeked_trimmed.starts_with("### ") || peeked_trimmed.starts_with("## ") {
                break;
            }
            let line = lines.next().unwrap_or_default();
            let trimmed = line.trim();
            if let Some(r) = trimmed.strip_prefix("Reason: ") {
                reason = r.to_string();
            } else if trimmed == "Content:" {
                // Expect the opening fence, then capture until the closing one.
                for fence_line in lines.by_ref() {
                    if fence_line.trim() == CONTENT_FENCE {
                        break;
                    }
                }
                let mut body = Vec::new();
                for content_line in lines.by_ref() {
                    if content_line.trim() == CONTENT_FENCE {
                        break;
                    }
                    body.push(content_line);
                }
                content = Some(body.join("\n"));
            }
        }

        edits.push(ProposedEdit {
            path,
            action,
            content,
            reason,
        });
    }

    edits
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl ReflectionStaging {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<IndexService>) -> Self {
        Self { store, index }
    }

    /// Write the staging document for review. Returns its path.
    pub async fn write_staged(&self, staged: &StagedReflection) -> Result<String> {
        let path = pending_path(&staged.date);
        let document = build_document(staged);
        self.store.write(&path, &document).await?;
        info!(path = %path, edits = staged.proposed_edits.len(), "reflection staged");
        Ok(path)
    }

    /// Pending staging documents, newest date first.
    pub async fn list_pending(&self) -> Result<Vec<String>> {
        let mut entries = self.store.list(PENDING_PREFIX, true).await?;
        entries.retain(|e| e.path.ends_with(".md"));
        // Dates are zero-padded, so lexicographic descending == newest first.
        entries.sort_by(|a, b| b.path.cmp(&a.path));
        Ok(entries.into_iter().map(|e| e.path).collect())
    }

    /// Move a pending document to the archive (copy, then delete source).
    pub async fn archive(&self, date: &str) -> Result<String> {
        let from = pending_path(date);
        let to = archive_path(date);
        let Some(obj) = self.store.read(&from).await? else {
            return Err(EngramError::NotFound(format!("no pending reflection: {from}")));
        };
        self.store.write(&to, &obj.content).await?;
        self.store.delete(&from).await?;
        Ok(to)
    }

    /// Apply staged edits through the object store, re-indexing every
    /// changed file. `selections` are 1-indexed; empty means all. Archives
    /// the document afterwards when requested and nothing failed.
    pub async fn apply(
        &self,
        date: &str,
        selections: &[usize],
        archive_on_success: bool,
    ) -> Result<ApplyReport> {
        let path = pending_path(date);
        let Some(obj) = self.store.read(&path).await? else {
            return Err(EngramError::NotFound(format!("no pending reflection: {path}")));
        };
        let edits = parse_edits(&obj.content);
        if edits.is_empty() {
            return Err(EngramError::InvalidInput(format!(
                "staged reflection {date} contains no proposed edits"
            )));
        }

        let selected: Vec<(usize, &ProposedEdit)> = if selections.is_empty() {
            edits.iter().enumerate().map(|(i, e)| (i + 1, e)).collect()
        } else {
            selections
                .iter()
                .filter_map(|&n| edits.get(n.checked_sub(1)?).map(|e| (n, e)))
                .collect()
        };
        if selected.is_empty() {
            return Err(EngramError::InvalidInput(
                "no valid edit selections".to_string(),
            ));
        }

        let mut report = ApplyReport::default();
        for (number, edit) in selected {
            match self.apply_edit(edit).await {
                Ok(()) => report.applied.push(format!("{number}: {}", edit.path)),
                Err(e) => report.errors.push(format!("{number}: {e}")),
            }
        }

        if archive_on_success && report.errors.is_empty() {
            self.archive(date).await?;
            report.archived = true;
        }
        Ok(report)
    }

    async fn apply_edit(&self, edit: &ProposedEdit) -> Result<()> {
        match edit.action {
            EditAction::Delete => {
                self.store.delete(&edit.path).await?;
                self.index.delete(&edit.path).await?;
            }
            EditAction::Create | EditAction::Replace => {
                let content = edit.content.as_deref().ok_or_else(|| {
                    EngramError::InvalidInput(format!("{} edit missing content", edit.action.as_str()))
                })?;
                self.store.write(&edit.path, content).await?;
                self.index.update(&edit.path, content).await?;
            }
            EditAction::Append => {
                let content = edit.content.as_deref().ok_or_else(|| {
                    EngramError::InvalidInput("append edit missing content".to_string())
                })?;
                let existing = self
                    .store
                    .read(&edit.path)
                    .await?
                    .ok_or_else(|| EngramError::NotFound(edit.path.clone()))?;
                let combined = format!("{}{}", existing.content, content);
                self.store.write(&edit.path, &combined).await?;
                self.index.update(&edit.path, &combined).await?;
            }
        }
        Ok(())
    }
}

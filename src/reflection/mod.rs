// src/reflection/mod.rs
// Agentic self-maintenance: a two-phase tool-calling pass over the memory
// files that auto-applies mechanical fixes and stages everything else for
// human review.

pub mod controller;
pub mod staging;
pub mod tools;

pub use self::controller::{
    AgenticReflectionResult, MAX_DEEP_ANALYSIS, MAX_QUICK_SCAN, ReflectionController,
};
pub use self::staging::ReflectionStaging;

use serde::{Deserialize, Serialize};

/// Where the last-reflection marker lives.
pub const LAST_REFLECTION_KEY: &str = "memory/meta/last-reflection.json";

/// Pending staged documents.
pub const PENDING_PREFIX: &str = "memory/reflections/pending/";

/// Archived staged documents.
pub const ARCHIVE_PREFIX: &str = "memory/reflections/archive/";

/// Action of a proposed edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Replace,
    Append,
    Delete,
    Create,
}

impl EditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Delete => "delete",
            Self::Create => "create",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "replace" => Some(Self::Replace),
            "append" => Some(Self::Append),
            "delete" => Some(Self::Delete),
            "create" => Some(Self::Create),
            _ => None,
        }
    }

    /// Whether this action requires a content payload.
    pub fn requires_content(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

/// Kind of a mechanically-safe auto-applied fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixType {
    Typo,
    Whitespace,
    Newline,
    Duplicate,
    Formatting,
}

impl FixType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typo => "typo",
            Self::Whitespace => "whitespace",
            Self::Newline => "newline",
            Self::Duplicate => "duplicate",
            Self::Formatting => "formatting",
        }
    }
}

/// An edit staged for human review. Never mutates files until applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedEdit {
    pub path: String,
    pub action: EditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub reason: String,
}

/// A fix that was executed immediately because it was mechanical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAppliedFix {
    pub path: String,
    pub fix_type: FixType,
    pub reason: String,
}

/// An issue the quick scan handed to deep analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedIssue {
    pub path: String,
    pub issue: String,
}

/// Everything a reflection run produced, as staged to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedReflection {
    /// YYYY-MM-DD
    pub date: String,
    pub summary: String,
    pub proposed_edits: Vec<ProposedEdit>,
    pub auto_applied_fixes: Vec<AutoAppliedFix>,
    pub flagged_issues: Vec<FlaggedIssue>,
    pub quick_scan_iterations: usize,
    pub deep_analysis_iterations: usize,
}

/// Last-reflection marker persisted after every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastReflection {
    /// RFC3339
    pub timestamp: String,
    /// YYYY-MM-DD
    pub date: String,
}

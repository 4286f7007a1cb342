use crate::error::RouterError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of one file taken at scan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: i64,
    /// Directory relative to the scan root, `/` separated, `""` for the root.
    pub parent_path: String,
    pub is_folder: bool,
    pub mime_type: Option<String>,
}

impl FileDescriptor {
    /// Path relative to the scan root.
    pub fn relative_path(&self) -> String {
        join_rel(&self.parent_path, &self.name)
    }

    pub fn extension(&self) -> Option<String> {
        split_extension(&self.name).1.map(|e| e.to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    Learned,
    Rules,
    Ai,
    Fallback,
}

impl RoutingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMethod::Learned => "learned",
            RoutingMethod::Rules => "rules",
            RoutingMethod::Ai => "ai",
            RoutingMethod::Fallback => "fallback",
        }
    }
}

impl fmt::Display for RoutingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSuggestion {
    pub file: FileDescriptor,
    /// Destination folder inside the project, trailing `/`.
    pub suggested_path: String,
    pub confidence: f32,
    pub reasoning: String,
    pub alternatives: Vec<String>,
    pub method: RoutingMethod,
}

impl RoutingSuggestion {
    pub fn level(&self, high: f32, medium: f32) -> ConfidenceLevel {
        if self.confidence >= high {
            ConfidenceLevel::High
        } else if self.confidence >= medium {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenameOutcome {
    SucceededInPlace,
    DownloadedFallback { copy: String },
    AlreadyCorrect,
    Failed { error: String },
}

impl RenameOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RenameOutcome::SucceededInPlace => "succeeded-in-place",
            RenameOutcome::DownloadedFallback { .. } => "downloaded-fallback",
            RenameOutcome::AlreadyCorrect => "already-correct",
            RenameOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameOperation {
    pub original: String,
    pub renamed: String,
    pub outcome: RenameOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub succeeded_in_place: usize,
    pub downloaded_fallback: usize,
    pub already_correct: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.succeeded_in_place + self.downloaded_fallback + self.already_correct + self.failed
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub operations: Vec<RenameOperation>,
    pub counts: OutcomeCounts,
}

impl BatchReport {
    pub fn push(&mut self, op: RenameOperation) {
        match op.outcome {
            RenameOutcome::SucceededInPlace => self.counts.succeeded_in_place += 1,
            RenameOutcome::DownloadedFallback { .. } => self.counts.downloaded_fallback += 1,
            RenameOutcome::AlreadyCorrect => self.counts.already_correct += 1,
            RenameOutcome::Failed { .. } => self.counts.failed += 1,
        }
        self.operations.push(op);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub signature: String,
    pub original_name: String,
    pub suggested_path: Option<String>,
    pub chosen_path: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    Drive,
}

/// One reviewed line of a routing plan. `accepted_path` is filled in by the
/// user when they override the suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub suggestion: RoutingSuggestion,
    #[serde(default)]
    pub accepted_path: Option<String>,
}

impl PlanEntry {
    pub fn target_folder(&self) -> &str {
        self.accepted_path
            .as_deref()
            .unwrap_or(&self.suggestion.suggested_path)
    }

    pub fn is_override(&self) -> bool {
        matches!(&self.accepted_path, Some(p) if normalize_folder(p) != self.suggestion.suggested_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub project_code: String,
    pub root: String,
    pub source: SourceKind,
    pub entries: Vec<PlanEntry>,
}

/// Joins a relative directory and a name with `/`.
pub fn join_rel(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Trims, converts `\` to `/`, drops leading slashes and ensures a trailing `/`.
/// The project root itself normalizes to `""`.
pub fn normalize_folder(path: &str) -> String {
    let cleaned = path.trim().replace('\\', "/");
    let cleaned = cleaned.trim_matches('/');
    if cleaned.is_empty() {
        String::new()
    } else {
        format!("{}/", cleaned)
    }
}

/// Checks that a project-relative path stays under the root: not absolute, no
/// drive prefix, no `..` segment.
pub fn stays_in_root(path: &str) -> Result<(), RouterError> {
    let cleaned = path.trim().replace('\\', "/");
    let escapes = cleaned.starts_with('/')
        || cleaned.split('/').any(|seg| seg == "..")
        || cleaned
            .split('/')
            .next()
            .map_or(false, |first| first.contains(':'));
    if escapes {
        Err(RouterError::EscapesRoot(path.to_string()))
    } else {
        Ok(())
    }
}

/// Splits at the last dot. A dot in first position does not start an
/// extension, so `.gitignore` has no extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

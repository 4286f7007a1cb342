//! Applies renames and moves, one independent operation per file.

use crate::fs_apply::{self, ConflictPolicy};
use crate::paths;
use anyhow::Result;
use futures::future::join_all;
use providers::onedrive::DriveClient;
use router_core::config::SafetyConfig;
use router_core::models::{
    join_rel, normalize_folder, stays_in_root, BatchReport, FileDescriptor, PlanEntry, RenameOperation,
    RenameOutcome, RoutingPlan,
};
use router_core::naming::{self, RenamePair};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::models::NewFileRouting;
use tokio::task;
use tracing::{info, warn};

/// Move `file` to `target`, both relative to the relocator's root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub file: FileDescriptor,
    pub target: String,
}

#[async_trait::async_trait]
pub trait Relocator: Send + Sync {
    /// Renames or moves in place. `Ok(None)` means the conflict policy skipped it;
    /// otherwise the final relative path is returned.
    async fn relocate(&self, file: &FileDescriptor, target: &str) -> Result<Option<String>>;
    /// Current bytes of the file, for the fallback copy.
    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>>;
    /// Location used for allow/deny checks.
    fn display_path(&self, rel: &str) -> String;
}

pub struct LocalRelocator {
    root: PathBuf,
    conflict: ConflictPolicy,
}

impl LocalRelocator {
    pub fn new(root: impl Into<PathBuf>, conflict: ConflictPolicy) -> Self {
        Self {
            root: root.into(),
            conflict,
        }
    }
}

#[async_trait::async_trait]
impl Relocator for LocalRelocator {
    async fn relocate(&self, file: &FileDescriptor, target: &str) -> Result<Option<String>> {
        let from = self.root.join(file.relative_path());
        let to = self.root.join(target);
        let (root, policy) = (self.root.clone(), self.conflict);
        task::spawn_blocking(move || -> Result<Option<String>> {
            let Some(dest) = fs_apply::move_in_place(&from, &to, policy)? else {
                return Ok(None);
            };
            let rel = dest
                .strip_prefix(&root)
                .unwrap_or(&dest)
                .to_string_lossy()
                .replace('\\', "/");
            Ok(Some(rel))
        })
        .await?
    }

    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.root.join(file.relative_path())).await?)
    }

    fn display_path(&self, rel: &str) -> String {
        self.root.join(rel).to_string_lossy().into_owned()
    }
}

pub struct DriveRelocator {
    client: Arc<dyn DriveClient>,
    root: String,
}

impl DriveRelocator {
    pub fn new(client: Arc<dyn DriveClient>, root: &str) -> Self {
        Self {
            client,
            root: root.trim_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Relocator for DriveRelocator {
    async fn relocate(&self, file: &FileDescriptor, target: &str) -> Result<Option<String>> {
        let (folder, name) = match target.rsplit_once('/') {
            Some((folder, name)) => (join_rel(&self.root, folder), name),
            None => (self.root.clone(), target),
        };
        self.client.move_item(&file.id, &folder, name).await?;
        Ok(Some(target.to_string()))
    }

    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>> {
        Ok(self.client.download(&file.id).await?.to_vec())
    }

    fn display_path(&self, rel: &str) -> String {
        format!("onedrive:/{}", join_rel(&self.root, rel))
    }
}

/// Applies one request. Never errors: every failure becomes an outcome.
pub async fn apply_one(
    relocator: &dyn Relocator,
    request: &MoveRequest,
    safety: &SafetyConfig,
) -> RenameOperation {
    let original = request.file.relative_path();
    let op = |renamed: String, outcome: RenameOutcome| RenameOperation {
        original: original.clone(),
        renamed,
        outcome,
    };

    if original == request.target {
        return op(request.target.clone(), RenameOutcome::AlreadyCorrect);
    }

    if let Err(e) = stays_in_root(&request.target) {
        return op(
            request.target.clone(),
            RenameOutcome::Failed {
                error: e.to_string(),
            },
        );
    }

    for rel in [&original, &request.target] {
        let shown = relocator.display_path(rel);
        if !paths::is_allowed(Path::new(&shown), &safety.allow_paths, &safety.deny_paths) {
            return op(
                request.target.clone(),
                RenameOutcome::Failed {
                    error: format!("path denied: {}", shown),
                },
            );
        }
    }

    let in_place_error = match relocator.relocate(&request.file, &request.target).await {
        Ok(Some(final_rel)) => return op(final_rel, RenameOutcome::SucceededInPlace),
        Ok(None) => {
            return op(
                request.target.clone(),
                RenameOutcome::Failed {
                    error: "skipped: target already exists".to_string(),
                },
            )
        }
        Err(e) => e,
    };
    warn!(file = %original, error = %in_place_error, "in-place change failed, writing a renamed copy");

    match fallback_copy(relocator, request, PathBuf::from(&safety.fallback_dir)).await {
        Ok(path) => op(
            request.target.clone(),
            RenameOutcome::DownloadedFallback {
                copy: path.to_string_lossy().into_owned(),
            },
        ),
        Err(e) => op(
            request.target.clone(),
            RenameOutcome::Failed {
                error: format!("{:#}; fallback copy failed: {:#}", in_place_error, e),
            },
        ),
    }
}

async fn fallback_copy(
    relocator: &dyn Relocator,
    request: &MoveRequest,
    fallback_dir: PathBuf,
) -> Result<PathBuf> {
    let bytes = relocator.fetch(&request.file).await?;
    let target = request.target.clone();
    task::spawn_blocking(move || fs_apply::write_fallback_copy(&fallback_dir, &target, &bytes)).await?
}

/// One request after the other.
pub async fn apply_sequential(
    relocator: &dyn Relocator,
    requests: &[MoveRequest],
    safety: &SafetyConfig,
) -> BatchReport {
    let mut report = BatchReport::default();
    for request in requests {
        report.push(apply_one(relocator, request, safety).await);
    }
    log_report(&report);
    report
}

/// All requests at once; each touches its own file. Report order follows
/// request order.
pub async fn apply_concurrent(
    relocator: &dyn Relocator,
    requests: &[MoveRequest],
    safety: &SafetyConfig,
) -> BatchReport {
    let ops = join_all(requests.iter().map(|r| apply_one(relocator, r, safety))).await;
    let mut report = BatchReport::default();
    for op in ops {
        report.push(op);
    }
    log_report(&report);
    report
}

fn log_report(report: &BatchReport) {
    let c = &report.counts;
    info!(
        in_place = c.succeeded_in_place,
        fallback = c.downloaded_fallback,
        unchanged = c.already_correct,
        failed = c.failed,
        "batch applied"
    );
}

pub fn rename_requests(files: &[FileDescriptor], pairs: &[RenamePair]) -> Vec<MoveRequest> {
    files
        .iter()
        .filter(|f| !f.is_folder)
        .zip(pairs)
        .map(|(file, pair)| MoveRequest {
            file: file.clone(),
            target: pair.renamed.clone(),
        })
        .collect()
}

/// Target for every plan entry: the accepted (or suggested) folder plus the
/// file name, project-prefixed when `prefix_names` is set.
pub fn plan_requests(plan: &RoutingPlan, prefix_names: bool) -> Vec<MoveRequest> {
    plan.entries
        .iter()
        .map(|entry| {
            let file = &entry.suggestion.file;
            let name = if prefix_names {
                naming::derive_file_name(&file.name, &plan.project_code)
            } else {
                file.name.clone()
            };
            MoveRequest {
                file: file.clone(),
                target: join_rel(&normalize_folder(entry.target_folder()), &name),
            }
        })
        .collect()
}

fn audit_row(project_id: i64, entry: &PlanEntry) -> NewFileRouting {
    let s = &entry.suggestion;
    NewFileRouting {
        project_id,
        file_name: s.file.name.clone(),
        file_type: s.file.mime_type.clone(),
        suggested_path: s.suggested_path.clone(),
        actual_path: normalize_folder(entry.target_folder()),
        confidence: s.confidence as f64,
        method: if entry.is_override() {
            "manual".to_string()
        } else {
            s.method.as_str().to_string()
        },
    }
}

/// Plan entries whose operation did not fail. Entries and operations are
/// matched by position.
pub fn applied_entries<'a>(plan: &'a RoutingPlan, report: &BatchReport) -> Vec<&'a PlanEntry> {
    plan.entries
        .iter()
        .zip(&report.operations)
        .filter(|(_, op)| !matches!(op.outcome, RenameOutcome::Failed { .. }))
        .map(|(entry, _)| entry)
        .collect()
}

/// One audit row per entry that was not a failure.
pub async fn record_routings(
    pool: &SqlitePool,
    project_id: i64,
    plan: &RoutingPlan,
    report: &BatchReport,
) -> Result<usize> {
    let entries = applied_entries(plan, report);
    for entry in &entries {
        storage::insert_file_routing(pool, &audit_row(project_id, entry)).await?;
    }
    Ok(entries.len())
}

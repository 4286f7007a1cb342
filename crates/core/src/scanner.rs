//! Lists the files under a project folder, locally or on the cloud drive.

use crate::error::RouterError;
use crate::models::{join_rel, FileDescriptor};
use globset::{Glob, GlobSet, GlobSetBuilder};
use providers::onedrive::{DriveClient, DriveItem};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub include_subfolders: bool,
    /// Deepest directory level listed on the drive; the root is level 0.
    pub max_remote_depth: usize,
    pub excludes: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_subfolders: true,
            max_remote_depth: 3,
            excludes: Vec::new(),
        }
    }
}

impl From<&crate::config::ScanConfig> for ScanOptions {
    fn from(cfg: &crate::config::ScanConfig) -> Self {
        Self {
            include_subfolders: cfg.include_subfolders,
            max_remote_depth: cfg.max_remote_depth,
            excludes: cfg.exclude.clone(),
        }
    }
}

#[derive(Clone)]
pub enum ScanSource {
    Local(PathBuf),
    Drive {
        client: Arc<dyn DriveClient>,
        root: String,
    },
}

impl ScanSource {
    pub fn describe(&self) -> String {
        match self {
            ScanSource::Local(p) => p.display().to_string(),
            ScanSource::Drive { root, .. } => format!("onedrive:/{}", root.trim_matches('/')),
        }
    }
}

/// Every non-folder file reachable from the root, sorted by relative path.
/// Unreadable subdirectories are skipped with a warning; only an unreadable
/// root is an error.
pub async fn scan(source: &ScanSource, opts: &ScanOptions) -> anyhow::Result<Vec<FileDescriptor>> {
    let excludes = build_globset(&opts.excludes)?;
    let mut files = match source {
        ScanSource::Local(root) => {
            let root = root.clone();
            let include_subfolders = opts.include_subfolders;
            task::spawn_blocking(move || scan_local(&root, include_subfolders, &excludes)).await??
        }
        ScanSource::Drive { client, root } => {
            scan_drive(client.as_ref(), root, opts, &excludes).await?
        }
    };
    files.sort_by(|a, b| {
        a.parent_path
            .cmp(&b.parent_path)
            .then_with(|| a.name.cmp(&b.name))
    });
    info!(source = %source.describe(), files = files.len(), "scan complete");
    Ok(files)
}

fn scan_local(
    root: &Path,
    include_subfolders: bool,
    excludes: &GlobSet,
) -> anyhow::Result<Vec<FileDescriptor>> {
    if !root.is_dir() {
        return Err(RouterError::NotConnected(format!("{} is not a directory", root.display())).into());
    }
    let max_depth = if include_subfolders { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || should_descend(root, e.path(), excludes))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(path = ?err.path(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping file without metadata");
                continue;
            }
        };
        let rel = relative(root, path);
        let parent_path = rel
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        let name = entry.file_name().to_string_lossy().into_owned();

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        files.push(FileDescriptor {
            id: blake3::hash(rel.as_bytes()).to_hex().to_string(),
            mime_type: sniff_mime(path, &name),
            name,
            size: meta.len(),
            last_modified: mtime,
            parent_path,
            is_folder: false,
        });
    }
    debug!(root = %root.display(), files = files.len(), "local walk finished");
    Ok(files)
}

async fn scan_drive(
    client: &dyn DriveClient,
    root: &str,
    opts: &ScanOptions,
    excludes: &GlobSet,
) -> anyhow::Result<Vec<FileDescriptor>> {
    let root = root.trim_matches('/').to_string();
    let mut files = Vec::new();
    // (relative dir, depth)
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((String::new(), 0));

    while let Some((rel_dir, depth)) = queue.pop_front() {
        let drive_path = join_rel(&root, &rel_dir);
        let children = match client.list_children(&drive_path).await {
            Ok(c) => c,
            Err(e) if depth == 0 => {
                return Err(RouterError::NotConnected(format!("{}: {}", drive_path, e)).into());
            }
            Err(e) => {
                warn!(folder = %drive_path, error = %e, "skipping unreadable drive folder");
                continue;
            }
        };

        for item in children {
            let rel = join_rel(&rel_dir, &item.name);
            if item.name.starts_with('.') || excludes.is_match(&rel) {
                continue;
            }
            if item.is_folder {
                if opts.include_subfolders && depth < opts.max_remote_depth {
                    queue.push_back((rel, depth + 1));
                } else {
                    debug!(folder = %rel, depth = depth + 1, "not descending");
                }
                continue;
            }
            files.push(descriptor_from_drive(item, &rel_dir));
        }
    }
    Ok(files)
}

fn descriptor_from_drive(item: DriveItem, parent_path: &str) -> FileDescriptor {
    let last_modified = item
        .last_modified
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.timestamp())
        .unwrap_or_default();
    let mime_type = item.mime_type.or_else(|| mime_from_name(&item.name));
    FileDescriptor {
        id: item.id,
        name: item.name,
        size: item.size,
        last_modified,
        parent_path: parent_path.to_string(),
        is_folder: false,
        mime_type,
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(root: &Path, path: &Path, excludes: &GlobSet) -> bool {
    !is_hidden(path) && !excludes.is_match(relative(root, path))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn sniff_mime(path: &Path, name: &str) -> Option<String> {
    infer::get_from_path(path)
        .ok()
        .flatten()
        .map(|t| t.mime_type().to_string())
        .or_else(|| mime_from_name(name))
}

pub fn mime_from_name(name: &str) -> Option<String> {
    let ext = crate::models::split_extension(name).1?.to_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "eml" => "message/rfc822",
        "msg" => "application/vnd.ms-outlook",
        "dwg" => "image/vnd.dwg",
        "dxf" => "image/vnd.dxf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "zip" => "application/zip",
        "p7m" => "application/pkcs7-mime",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::ProviderError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[tokio::test]
    async fn local_scan_records_relative_parents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), b"%PDF-1.4").unwrap();
        fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        for name in ["c.dwg", "d.jpg", "e.docx"] {
            fs::write(dir.path().join("sub").join(name), b"x").unwrap();
        }
        fs::write(dir.path().join(".hidden"), b"x").unwrap();

        let files = scan(
            &ScanSource::Local(dir.path().to_path_buf()),
            &ScanOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(files.len(), 5);
        let parents: Vec<(&str, &str)> = files
            .iter()
            .map(|f| (f.parent_path.as_str(), f.name.as_str()))
            .collect();
        assert_eq!(
            parents,
            vec![
                ("", "a.pdf"),
                ("", "b.txt"),
                ("sub", "c.dwg"),
                ("sub", "d.jpg"),
                ("sub", "e.docx"),
            ]
        );
        assert_eq!(files[0].mime_type.as_deref(), Some("application/pdf"));
        assert!(files.iter().all(|f| !f.is_folder));
    }

    #[tokio::test]
    async fn local_scan_without_subfolders_and_with_excludes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        fs::write(dir.path().join("skip.tmp"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.pdf"), b"x").unwrap();

        let opts = ScanOptions {
            include_subfolders: false,
            excludes: vec!["*.tmp".into()],
            ..ScanOptions::default()
        };
        let files = scan(&ScanSource::Local(dir.path().to_path_buf()), &opts)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.pdf");
    }

    #[tokio::test]
    async fn missing_root_is_not_connected() {
        let err = scan(
            &ScanSource::Local(PathBuf::from("/definitely/not/here")),
            &ScanOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<RouterError>().is_some());
    }

    /// In-memory drive: folder path -> children. Counts list calls.
    #[derive(Default)]
    struct FakeDrive {
        tree: HashMap<String, Vec<DriveItem>>,
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDrive {
        fn add(&mut self, folder: &str, name: &str, is_folder: bool) {
            self.tree.entry(folder.to_string()).or_default().push(DriveItem {
                id: format!("{}/{}", folder, name),
                name: name.to_string(),
                size: 1,
                last_modified: Some("2025-03-01T10:00:00Z".into()),
                is_folder,
                mime_type: None,
            });
        }
    }

    #[async_trait::async_trait]
    impl DriveClient for FakeDrive {
        async fn list_children(&self, path: &str) -> Result<Vec<DriveItem>, ProviderError> {
            self.calls.lock().unwrap().push(path.to_string());
            if self.failing.iter().any(|f| f == path) {
                return Err(ProviderError::RequestFailed("boom".into()));
            }
            Ok(self.tree.get(path).cloned().unwrap_or_default())
        }
        async fn item_by_path(&self, path: &str) -> Result<DriveItem, ProviderError> {
            Err(ProviderError::NotFound(path.into()))
        }
        async fn move_item(&self, _: &str, _: &str, _: &str) -> Result<DriveItem, ProviderError> {
            Err(ProviderError::NotImplemented)
        }
        async fn download(&self, _: &str) -> Result<bytes::Bytes, ProviderError> {
            Err(ProviderError::NotImplemented)
        }
    }

    fn deep_drive() -> FakeDrive {
        // P/ -> l1/ -> l2/ -> l3/ -> l4/, one file per level.
        let mut drive = FakeDrive::default();
        let mut folder = "P".to_string();
        for level in 0..5 {
            drive.add(&folder, &format!("f{}.pdf", level), false);
            if level < 4 {
                let sub = format!("l{}", level + 1);
                drive.add(&folder, &sub, true);
                folder = format!("{}/{}", folder, sub);
            }
        }
        drive
    }

    #[tokio::test]
    async fn drive_scan_respects_depth_limit() {
        let drive = Arc::new(deep_drive());
        let source = ScanSource::Drive {
            client: drive.clone(),
            root: "/P/".into(),
        };
        let opts = ScanOptions {
            max_remote_depth: 2,
            ..ScanOptions::default()
        };
        let files = scan(&source, &opts).await.unwrap();

        // Directories at depth <= 2: P, l1, l2.
        let calls = drive.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["P", "P/l1", "P/l1/l2"]);
        assert_eq!(files.len(), 3);
        assert_eq!(files[2].parent_path, "l1/l2");
        assert_eq!(files[2].last_modified, 1740823200);
    }

    #[tokio::test]
    async fn drive_scan_skips_failing_subfolder() {
        let mut drive = FakeDrive::default();
        drive.add("P", "a.pdf", false);
        drive.add("P", "broken", true);
        drive.add("P", "ok", true);
        drive.add("P/ok", "b.pdf", false);
        drive.failing.push("P/broken".into());
        let source = ScanSource::Drive {
            client: Arc::new(drive),
            root: "P".into(),
        };
        let files = scan(&source, &ScanOptions::default()).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative_path()).collect();
        assert_eq!(names, vec!["a.pdf", "ok/b.pdf"]);
        assert_eq!(files[0].mime_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn drive_root_failure_is_an_error() {
        let mut drive = FakeDrive::default();
        drive.failing.push("P".into());
        let source = ScanSource::Drive {
            client: Arc::new(drive),
            root: "P".into(),
        };
        assert!(scan(&source, &ScanOptions::default()).await.is_err());
    }
}

//! The project root folder remembered between runs. Only the location and the
//! last successful check are stored; access is re-verified every session.

use crate::error::RouterError;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderBinding {
    pub root: PathBuf,
    pub verified_at: Option<DateTime<Utc>>,
}

impl FolderBinding {
    pub fn load(state_path: &Path) -> anyhow::Result<Option<Self>> {
        if !state_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(state_path)
            .with_context(|| format!("reading {}", state_path.display()))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, state_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = state_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(state_path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Checks the folder is still a readable directory and stamps the time.
    pub fn verify(&mut self) -> Result<(), RouterError> {
        match fs::read_dir(&self.root) {
            Ok(_) => {
                self.verified_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => Err(RouterError::NotConnected(format!(
                "{}: {}",
                self.root.display(),
                e
            ))),
        }
    }
}

/// Binds `root`, verifying it first, and persists the binding.
pub fn bind(state_path: &Path, root: &Path) -> anyhow::Result<FolderBinding> {
    let mut binding = FolderBinding {
        root: root.to_path_buf(),
        verified_at: None,
    };
    binding.verify()?;
    binding.save(state_path)?;
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_reverify() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state/folder.json");
        let root = dir.path().join("project");
        fs::create_dir_all(&root).unwrap();

        let bound = bind(&state, &root).unwrap();
        assert!(bound.verified_at.is_some());

        let mut loaded = FolderBinding::load(&state).unwrap().unwrap();
        assert_eq!(loaded.root, root);

        fs::remove_dir_all(&root).unwrap();
        assert!(matches!(loaded.verify(), Err(RouterError::NotConnected(_))));
    }

    #[test]
    fn missing_state_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FolderBinding::load(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());
    }
}

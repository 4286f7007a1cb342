//! Persistent record of user corrections, consulted before classification.
//!
//! Stored as a JSON object keyed by file signature. Grows without bound.

use crate::models::{normalize_folder, split_extension, Correction};
use anyhow::Context;
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

const MIN_FUZZY_LEN: usize = 4;

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9-]+_").expect("static regex"))
}

/// Normalized key for a file name: project prefix dropped, lowercase,
/// punctuation runs collapsed, extension after `|`.
pub fn signature(file_name: &str) -> String {
    let (stem, ext) = split_extension(file_name);
    let stem = prefix_re().replace(stem, "");
    let words: Vec<String> = stem
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    format!(
        "{}|{}",
        words.join(" "),
        ext.map(|e| e.to_lowercase()).unwrap_or_default()
    )
}

#[derive(Debug, Default)]
pub struct LearningStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Vec<Correction>>,
}

impl LearningStore {
    /// Store that lives only for this process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let entries = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading learning store {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing learning store {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a correction and persists the store.
    pub fn record(
        &mut self,
        file_name: &str,
        suggested_path: Option<&str>,
        chosen_path: &str,
    ) -> anyhow::Result<Correction> {
        let correction = Correction {
            signature: signature(file_name),
            original_name: file_name.to_string(),
            suggested_path: suggested_path.map(normalize_folder),
            chosen_path: normalize_folder(chosen_path),
            recorded_at: Utc::now(),
        };
        self.entries
            .entry(correction.signature.clone())
            .or_default()
            .push(correction.clone());
        self.persist()?;
        debug!(signature = %correction.signature, path = %correction.chosen_path, "correction recorded");
        Ok(correction)
    }

    /// Most recent correction for the exact signature, else for a similar name
    /// with the same extension.
    pub fn lookup(&self, file_name: &str) -> Option<&Correction> {
        let sig = signature(file_name);
        if let Some(hit) = self.entries.get(&sig).and_then(|v| latest(v)) {
            return Some(hit);
        }

        let (stem, ext) = sig.split_once('|').unwrap_or((sig.as_str(), ""));
        if stem.len() < MIN_FUZZY_LEN {
            return None;
        }
        self.entries
            .iter()
            .filter(|(key, _)| {
                let (k_stem, k_ext) = key.split_once('|').unwrap_or((key.as_str(), ""));
                k_ext == ext
                    && k_stem.len() >= MIN_FUZZY_LEN
                    && (k_stem.contains(stem) || stem.contains(k_stem))
            })
            .filter_map(|(_, v)| latest(v))
            .max_by_key(|c| c.recorded_at)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        fs::rename(&tmp, path)
            .with_context(|| format!("writing learning store {}", path.display()))?;
        Ok(())
    }
}

fn latest(list: &[Correction]) -> Option<&Correction> {
    list.iter().max_by_key(|c| c.recorded_at)
}

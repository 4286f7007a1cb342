//! Project-prefixed file names: `<code>_<rest>.<ext>`.

use crate::error::RouterError;
use crate::models::{join_rel, split_extension, FileDescriptor};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Any leading `UPPERCASE-ALNUM_` token is treated as a previous project prefix.
/// This also matches tokens like `2024_` that were never a project code.
fn foreign_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]+_").expect("static regex"))
}

pub fn validate_project_code(code: &str) -> Result<(), RouterError> {
    let valid = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RouterError::InvalidProjectCode(code.to_string()))
    }
}

/// Maps a file name onto its project-prefixed form. Applying it twice with the
/// same code gives the same result as applying it once.
pub fn derive_file_name(name: &str, code: &str) -> String {
    let prefix = format!("{}_", code);
    let (stem, ext) = split_extension(name);
    match ext {
        None => {
            if name.starts_with(&prefix) {
                name.to_string()
            } else {
                format!("{}{}", prefix, name)
            }
        }
        Some(ext) => {
            if stem.starts_with(&prefix) {
                return name.to_string();
            }
            let rest = match foreign_prefix().find(stem) {
                Some(m) => &stem[m.end()..],
                None => stem,
            };
            format!("{}{}.{}", prefix, rest, ext)
        }
    }
}

/// A rename inside the same directory, paths relative to the scan root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePair {
    pub original: String,
    pub renamed: String,
}

impl RenamePair {
    pub fn is_noop(&self) -> bool {
        self.original == self.renamed
    }
}

pub fn plan_bulk_rename(files: &[FileDescriptor], code: &str) -> Vec<RenamePair> {
    files
        .iter()
        .filter(|f| !f.is_folder)
        .map(|f| RenamePair {
            original: f.relative_path(),
            renamed: join_rel(&f.parent_path, &derive_file_name(&f.name, code)),
        })
        .collect()
}

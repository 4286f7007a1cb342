//! Folder structure of a project ("commessa").

use crate::config::FALLBACK_PATH;
use crate::models::normalize_folder;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFolder {
    pub path: String,
    #[serde(default)]
    pub description: String,
    /// Lowercase words that, found in a file name, point at this folder.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Lowercase extensions without the dot.
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTemplate {
    pub name: String,
    pub folders: Vec<TemplateFolder>,
}

impl ProjectTemplate {
    fn normalized(mut self) -> Self {
        for folder in &mut self.folders {
            folder.path = normalize_folder(&folder.path);
            folder.keywords = folder.keywords.iter().map(|k| k.to_lowercase()).collect();
            folder.extensions = folder
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect();
        }
        self.folders.retain(|f| !f.path.is_empty());
        if !self.contains(FALLBACK_PATH) {
            self.folders.push(TemplateFolder {
                path: FALLBACK_PATH.to_string(),
                description: "Material received, not yet filed".to_string(),
                keywords: Vec::new(),
                extensions: Vec::new(),
            });
        }
        self
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading template {}", path.display()))?;
        let template: ProjectTemplate = toml::from_str(&content)
            .with_context(|| format!("parsing template {}", path.display()))?;
        Ok(template.normalized())
    }

    pub fn contains(&self, path: &str) -> bool {
        let wanted = normalize_folder(path);
        self.folders.iter().any(|f| f.path == wanted)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.folders.iter().map(|f| f.path.as_str())
    }

    /// One folder per line, as shown to the model.
    pub fn render(&self) -> String {
        self.folders
            .iter()
            .map(|f| {
                if f.description.is_empty() {
                    format!("- {}", f.path)
                } else {
                    format!("- {} ({})", f.path, f.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ProjectTemplate {
    fn default() -> Self {
        let folder = |path: &str, description: &str, keywords: &[&str], extensions: &[&str]| {
            TemplateFolder {
                path: path.to_string(),
                description: description.to_string(),
                keywords: keywords.iter().map(|s| s.to_string()).collect(),
                extensions: extensions.iter().map(|s| s.to_string()).collect(),
            }
        };
        ProjectTemplate {
            name: "commessa-standard".to_string(),
            folders: vec![
                folder(
                    "AMMINISTRAZIONE/CONTRATTI/",
                    "Contracts, assignments, offers",
                    &["contratto", "incarico", "disciplinare", "offerta", "preventivo"],
                    &[],
                ),
                folder(
                    "AMMINISTRAZIONE/FATTURE/",
                    "Invoices and fee notes",
                    &["fattura", "parcella", "notula", "pagamento", "invoice"],
                    &[],
                ),
                folder(
                    "CORRISPONDENZA/",
                    "Letters, PEC, meeting minutes",
                    &["pec", "lettera", "comunicazione", "verbale", "nota"],
                    &["eml", "msg"],
                ),
                folder(
                    "ELABORATI_GRAFICI/",
                    "Drawings",
                    &["tavola", "tav", "pianta", "prospetto", "sezione", "planimetria"],
                    &["dwg", "dxf", "rvt", "ifc"],
                ),
                folder(
                    "RELAZIONI/",
                    "Technical reports",
                    &["relazione", "report", "capitolato", "computo"],
                    &[],
                ),
                folder(
                    "CALCOLI/",
                    "Structural and energy calculations",
                    &["calcolo", "calcoli", "verifica", "sismica", "tabulato"],
                    &[],
                ),
                folder(
                    "FOTO/",
                    "Site photos",
                    &["foto", "sopralluogo"],
                    &["jpg", "jpeg", "png", "heic"],
                ),
                folder(
                    "NORMATIVA/",
                    "Standards and regulations",
                    &["norma", "ntc", "decreto", "circolare"],
                    &[],
                ),
                folder(
                    FALLBACK_PATH,
                    "Material received, not yet filed",
                    &[],
                    &[],
                ),
            ],
        }
        .normalized()
    }
}

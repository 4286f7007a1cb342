use serde::{Deserialize, Serialize};

pub const FALLBACK_PATH: &str = "MATERIALE_RICEVUTO/";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub project: ProjectConfig,
    pub scan: ScanConfig,
    pub classification: ClassificationConfig,
    pub llm: LlmConfig,
    pub drive: DriveConfig,
    pub learning: LearningConfig,
    pub safety: SafetyConfig,
    pub rules: RuleConfig,
    pub folder: FolderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/commesse.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub code: Option<String>,
    /// TOML file describing the project folder template.
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub include_subfolders: bool,
    /// Deepest directory level listed on the cloud drive; the root is level 0.
    pub max_remote_depth: usize,
    pub exclude: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_subfolders: true,
            max_remote_depth: 3,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub thresholds: Thresholds,
    pub fallback_path: String,
    pub max_tokens: u32,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            fallback_path: FALLBACK_PATH.to_string(),
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub high: f32,
    pub medium: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.6,
        }
    }
}

/// `provider` is one of `anthropic`, `openai`, `deepseek`, `noop`.
/// Keys come from the environment, never from the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "anthropic".to_string(),
            model: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub base_url: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            base_url: providers::onedrive::GRAPH_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "data/learning.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub dry_run: bool,
    pub allow_paths: Vec<String>,
    pub deny_paths: Vec<String>,
    /// Where renamed copies land when a file cannot be changed in place.
    pub fallback_dir: String,
    /// rename | skip | overwrite
    pub conflict: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_paths: Vec::new(),
            deny_paths: Vec::new(),
            fallback_dir: "downloads".to_string(),
            conflict: "rename".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    pub state_path: String,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            state_path: "data/folder_config.json".to_string(),
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(config::Environment::with_prefix("ROUTER").separator("__"));
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[project]\ncode = \"25ABC123\"\n\n[scan]\nmax_remote_depth = 5").unwrap();

        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.project.code.as_deref(), Some("25ABC123"));
        assert_eq!(cfg.scan.max_remote_depth, 5);
        assert!(cfg.scan.include_subfolders);
        assert_eq!(cfg.classification.fallback_path, FALLBACK_PATH);
        assert_eq!(cfg.safety.conflict, "rename");
    }
}

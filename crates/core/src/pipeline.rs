//! Routing session: the explicit context every stage runs against, and the
//! `scan -> classify -> review -> apply` stages that only need core.

use crate::classifier::{self, ClassifierContext};
use crate::config::AppConfig;
use crate::error::RouterError;
use crate::learning::LearningStore;
use crate::models::{FileDescriptor, PlanEntry, RoutingPlan, RoutingSuggestion, SourceKind};
use crate::naming;
use crate::rules::{self, Rule};
use crate::scanner::{self, ScanOptions, ScanSource};
use crate::template::ProjectTemplate;
use anyhow::Context;
use providers::anthropic::{AnthropicConfig, AnthropicProvider};
use providers::noop::NoopProvider;
use providers::onedrive::{DriveClient, GraphConfig, GraphDriveClient};
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::{LlmProvider, ProviderRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Session {
    pub config: AppConfig,
    pub registry: ProviderRegistry,
    pub template: ProjectTemplate,
    pub rules: Vec<Rule>,
    pub learning: LearningStore,
}

impl Session {
    /// Loads template, rules and learning store named by the config and
    /// registers every LLM provider whose key is present in the environment.
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        let template = match &config.project.template {
            Some(p) => ProjectTemplate::load(&PathBuf::from(p))?,
            None => ProjectTemplate::default(),
        };

        let mut rule_set = rules::rules_from_template(&template);
        if let Some(dir) = &config.rules.path {
            let extra = rules::load_rules_from_dir(&PathBuf::from(dir))
                .with_context(|| format!("loading rules from {}", dir))?;
            info!(count = extra.len(), dir = %dir, "loaded rule files");
            rule_set.extend(extra);
        }
        let rule_set = rules::validated(rule_set, &template);

        let learning = if config.learning.enabled {
            LearningStore::open(&PathBuf::from(&config.learning.path))?
        } else {
            LearningStore::in_memory()
        };

        let registry = build_registry(&config);
        Ok(Self::with_parts(config, registry, template, rule_set, learning))
    }

    pub fn with_parts(
        config: AppConfig,
        registry: ProviderRegistry,
        template: ProjectTemplate,
        rules: Vec<Rule>,
        learning: LearningStore,
    ) -> Self {
        Self {
            config,
            registry,
            template,
            rules,
            learning,
        }
    }

    /// The explicit code wins over the configured one. Validated before any I/O.
    pub fn project_code(&self, explicit: Option<&str>) -> Result<String, RouterError> {
        let code = explicit
            .map(str::to_string)
            .or_else(|| self.config.project.code.clone())
            .ok_or(RouterError::MissingProject)?;
        naming::validate_project_code(&code)?;
        Ok(code)
    }

    pub fn llm(&self) -> Option<Arc<dyn LlmProvider>> {
        if !self.config.llm.enabled {
            return None;
        }
        match self.registry.llm(None) {
            Ok(llm) => Some(llm),
            Err(e) => {
                warn!(error = %e, "AI classification unavailable");
                None
            }
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::from(&self.config.scan)
    }

    pub async fn scan(&self, source: &ScanSource) -> anyhow::Result<Vec<FileDescriptor>> {
        scanner::scan(source, &self.scan_options()).await
    }

    pub async fn classify_all(
        &self,
        project_code: &str,
        files: &[FileDescriptor],
    ) -> Vec<RoutingSuggestion> {
        let ctx = ClassifierContext {
            project_code,
            template: &self.template,
            rules: &self.rules,
            learning: if self.config.learning.enabled {
                Some(&self.learning)
            } else {
                None
            },
            llm: self.llm(),
            fallback_path: &self.config.classification.fallback_path,
            max_tokens: self.config.classification.max_tokens,
        };
        classifier::classify_all(files, &ctx).await
    }

    /// Scan plus classification, packaged for review.
    pub async fn plan(&self, project_code: &str, source: &ScanSource) -> anyhow::Result<RoutingPlan> {
        let files = self.scan(source).await?;
        let suggestions = self.classify_all(project_code, &files).await;
        let kind = match source {
            ScanSource::Local(_) => SourceKind::Local,
            ScanSource::Drive { .. } => SourceKind::Drive,
        };
        let root = match source {
            ScanSource::Local(p) => p.to_string_lossy().into_owned(),
            ScanSource::Drive { root, .. } => root.trim_matches('/').to_string(),
        };
        Ok(RoutingPlan {
            project_code: project_code.to_string(),
            root,
            source: kind,
            entries: suggestions
                .into_iter()
                .map(|suggestion| PlanEntry {
                    suggestion,
                    accepted_path: None,
                })
                .collect(),
        })
    }

    /// Stores every overridden entry as a correction. Callers pass only the
    /// entries that were actually applied.
    pub fn record_corrections<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a PlanEntry>,
    ) -> anyhow::Result<usize> {
        if !self.config.learning.enabled {
            return Ok(0);
        }
        let mut recorded = 0;
        for entry in entries.into_iter().filter(|e| e.is_override()) {
            self.learning.record(
                &entry.suggestion.file.name,
                Some(&entry.suggestion.suggested_path),
                entry.target_folder(),
            )?;
            recorded += 1;
        }
        Ok(recorded)
    }
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new().with_llm("noop", Arc::new(NoopProvider));
    let preferred = config.llm.provider.as_str();
    let base_override = |name: &str| {
        if name == preferred {
            config.llm.base_url.clone()
        } else {
            None
        }
    };
    let model_override = |name: &str, default: &str| {
        if name == preferred {
            config.llm.model.clone().unwrap_or_else(|| default.to_string())
        } else {
            default.to_string()
        }
    };

    if let Some(key) = std::env::var_os("ANTHROPIC_API_KEY") {
        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base_override("anthropic")
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            model: model_override("anthropic", "claude-sonnet-4-5-20250929"),
        });
        reg = reg.with_llm("anthropic", Arc::new(provider));
    }

    if let Some(key) = std::env::var_os("OPENAI_API_KEY") {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base_override("openai")
                .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            chat_model: model_override("openai", "gpt-4o-mini"),
        });
        reg = reg.with_llm("openai", Arc::new(provider));
    }

    if let Some(key) = std::env::var_os("DEEPSEEK_API_KEY") {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base_override("deepseek")
                .unwrap_or_else(|| "https://api.deepseek.com".to_string()),
            chat_model: model_override("deepseek", "deepseek-chat"),
        });
        reg = reg.with_llm("deepseek", Arc::new(provider));
    }

    if !reg.has_llm(preferred) {
        warn!(provider = %preferred, "preferred LLM provider has no API key, AI routing disabled");
    }
    reg.set_preferred_llm(preferred)
}

/// Graph client authenticated with `GRAPH_TOKEN`.
pub fn build_drive_client(config: &AppConfig) -> Result<Arc<dyn DriveClient>, RouterError> {
    let token = std::env::var("GRAPH_TOKEN")
        .map_err(|_| RouterError::NotConnected("GRAPH_TOKEN is not set".to_string()))?;
    Ok(Arc::new(GraphDriveClient::new(GraphConfig {
        base_url: config.drive.base_url.clone(),
        access_token: token,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoutingMethod;
    use std::fs;

    fn session(dir: &std::path::Path) -> Session {
        let mut config = AppConfig::default();
        config.project.code = Some("25ABC123".into());
        config.learning.path = dir.join("learning.json").to_string_lossy().into_owned();
        config.llm.enabled = false;
        let template = ProjectTemplate::default();
        let rules = rules::rules_from_template(&template);
        Session::with_parts(
            config,
            ProviderRegistry::new(),
            template,
            rules,
            LearningStore::open(&dir.join("learning.json")).unwrap(),
        )
    }

    #[test]
    fn project_code_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        assert_eq!(s.project_code(None).unwrap(), "25ABC123");
        assert_eq!(s.project_code(Some("25XYZ999")).unwrap(), "25XYZ999");
        assert!(matches!(
            s.project_code(Some("bad code")),
            Err(RouterError::InvalidProjectCode(_))
        ));
        s.config.project.code = None;
        assert!(matches!(s.project_code(None), Err(RouterError::MissingProject)));
    }

    #[tokio::test]
    async fn plan_then_correct_then_learn() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("in")).unwrap();
        fs::write(root.join("in/fattura_01.pdf"), b"x").unwrap();
        fs::write(root.join("in/misc.bin"), b"x").unwrap();

        let mut s = session(dir.path());
        let mut plan = s
            .plan("25ABC123", &ScanSource::Local(root.clone()))
            .await
            .unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].suggestion.method, RoutingMethod::Rules);
        assert_eq!(plan.entries[1].suggestion.method, RoutingMethod::Fallback);

        plan.entries[1].accepted_path = Some("CALCOLI".into());
        assert_eq!(s.record_corrections(&plan.entries).unwrap(), 1);

        let again = s
            .plan("25ABC123", &ScanSource::Local(root))
            .await
            .unwrap();
        let misc = &again.entries[1].suggestion;
        assert_eq!(misc.method, RoutingMethod::Learned);
        assert_eq!(misc.suggested_path, "CALCOLI/");
    }
}

//! Provider abstractions for LLMs and the cloud drive.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod anthropic;
pub mod noop;
pub mod onedrive;
pub mod openai;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not implemented")]
    NotImplemented,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::RequestFailed(e.to_string())
    }
}

/// A single-turn completion: system instructions plus one user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the raw text of the model's reply.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    llms: HashMap<String, Arc<dyn LlmProvider>>,
    pub preferred_llm: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, name: &str, provider: Arc<dyn LlmProvider>) -> Self {
        self.llms.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_llm(mut self, name: &str) -> Self {
        self.preferred_llm = Some(name.to_string());
        self
    }

    pub fn has_llm(&self, name: &str) -> bool {
        self.llms.contains_key(name)
    }

    pub fn llm(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_llm.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no llm provider configured".into()))?;
        self.llms
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_falls_back_to_preferred() {
        let reg = ProviderRegistry::new()
            .with_llm("noop", Arc::new(noop::NoopProvider))
            .set_preferred_llm("noop");
        assert!(reg.llm(None).is_ok());
        assert!(matches!(
            reg.llm(Some("missing")),
            Err(ProviderError::UnknownProvider(name)) if name == "missing"
        ));
    }

    #[test]
    fn registry_without_preference_errors() {
        let reg = ProviderRegistry::new();
        assert!(reg.llm(None).is_err());
    }
}

//! Suggests a destination folder for a file: learned corrections first, then
//! the rule table, then the LLM. Never fails; a file the model cannot place
//! lands in the fallback folder.

use crate::learning::LearningStore;
use crate::models::{
    normalize_folder, stays_in_root, FileDescriptor, RoutingMethod, RoutingSuggestion,
};
use crate::rules::{self, Rule, RuleContext};
use crate::template::ProjectTemplate;
use providers::{CompletionRequest, LlmProvider};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LEARNED_CONFIDENCE: f32 = 1.0;
const RULE_CONFIDENCE: f32 = 0.9;
const FALLBACK_CONFIDENCE: f32 = 0.5;

const SYSTEM_PROMPT: &str = "You file documents for an engineering firm. \
Each project has a fixed folder template. Given one file, choose the template \
folder it belongs to. Reply with a single JSON object and nothing else: \
{\"suggested_path\": \"FOLDER/\", \"confidence\": 0.0-1.0, \
\"reasoning\": \"one sentence\", \"alternatives\": [\"FOLDER/\", ...]}";

pub struct ClassifierContext<'a> {
    pub project_code: &'a str,
    pub template: &'a ProjectTemplate,
    pub rules: &'a [Rule],
    pub learning: Option<&'a LearningStore>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub fallback_path: &'a str,
    pub max_tokens: u32,
}

/// Outcome of reading the model's reply.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmVerdict {
    Parsed {
        suggested_path: String,
        confidence: f32,
        reasoning: String,
        alternatives: Vec<String>,
    },
    Malformed {
        reason: String,
    },
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(alias = "suggestedPath", alias = "path")]
    suggested_path: Option<String>,
    confidence: Option<f64>,
    reasoning: Option<String>,
    #[serde(default)]
    alternatives: Vec<String>,
}

pub fn parse_llm_reply(raw: &str) -> LlmVerdict {
    let (start, end) = match (raw.find('{'), raw.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            return LlmVerdict::Malformed {
                reason: "no JSON object in reply".to_string(),
            }
        }
    };
    let reply: RawReply = match serde_json::from_str(&raw[start..=end]) {
        Ok(r) => r,
        Err(e) => {
            return LlmVerdict::Malformed {
                reason: format!("invalid JSON in reply: {}", e),
            }
        }
    };
    let suggested_path = match reply.suggested_path.as_deref().map(normalize_folder) {
        Some(p) if !p.is_empty() => p,
        _ => {
            return LlmVerdict::Malformed {
                reason: "reply has no suggested_path".to_string(),
            }
        }
    };
    // Leading slashes are already gone; what is left must stay inside the project.
    if let Err(e) = stays_in_root(&suggested_path) {
        return LlmVerdict::Malformed {
            reason: e.to_string(),
        };
    }
    let confidence = match reply.confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0) as f32,
        Some(_) => {
            return LlmVerdict::Malformed {
                reason: "confidence is not a number".to_string(),
            }
        }
        None => FALLBACK_CONFIDENCE,
    };
    let mut alternatives: Vec<String> = Vec::new();
    for alt in reply
        .alternatives
        .iter()
        .map(|a| normalize_folder(a))
        .filter(|a| stays_in_root(a).is_ok())
    {
        if !alt.is_empty() && alt != suggested_path && !alternatives.contains(&alt) {
            alternatives.push(alt);
        }
    }
    LlmVerdict::Parsed {
        suggested_path,
        confidence,
        reasoning: reply.reasoning.unwrap_or_default(),
        alternatives,
    }
}

pub fn build_prompt(file: &FileDescriptor, ctx: &ClassifierContext<'_>) -> String {
    format!(
        "Project code: {code}\n\
         Template folders:\n{template}\n\n\
         File name: {name}\n\
         MIME type: {mime}\n\
         Current folder: {parent}\n\
         Size: {size} bytes",
        code = ctx.project_code,
        template = ctx.template.render(),
        name = file.name,
        mime = file.mime_type.as_deref().unwrap_or("unknown"),
        parent = if file.parent_path.is_empty() {
            "/"
        } else {
            file.parent_path.as_str()
        },
        size = file.size,
    )
}

fn fallback(file: &FileDescriptor, ctx: &ClassifierContext<'_>, reason: String) -> RoutingSuggestion {
    RoutingSuggestion {
        file: file.clone(),
        suggested_path: normalize_folder(ctx.fallback_path),
        confidence: FALLBACK_CONFIDENCE,
        reasoning: reason,
        alternatives: Vec::new(),
        method: RoutingMethod::Fallback,
    }
}

pub async fn classify(file: &FileDescriptor, ctx: &ClassifierContext<'_>) -> RoutingSuggestion {
    // 1. Learned corrections.
    if let Some(hit) = ctx.learning.and_then(|store| store.lookup(&file.name)) {
        return RoutingSuggestion {
            file: file.clone(),
            suggested_path: hit.chosen_path.clone(),
            confidence: LEARNED_CONFIDENCE,
            reasoning: format!("learned from correction of {}", hit.original_name),
            alternatives: hit.suggested_path.clone().into_iter().collect(),
            method: RoutingMethod::Learned,
        };
    }

    // 2. Rule table.
    let ext = file.extension();
    let rule_ctx = RuleContext::new(
        &file.name,
        &file.parent_path,
        file.mime_type.as_deref(),
        ext.as_deref(),
    );
    let hits = rules::evaluate(ctx.rules, &rule_ctx);
    if let Some(first) = hits.first() {
        let mut alternatives: Vec<String> = Vec::new();
        for rule in &hits[1..] {
            if rule.target != first.target && !alternatives.contains(&rule.target) {
                alternatives.push(rule.target.clone());
            }
        }
        return RoutingSuggestion {
            file: file.clone(),
            suggested_path: first.target.clone(),
            confidence: RULE_CONFIDENCE,
            reasoning: format!("matched rule {}", first.name),
            alternatives,
            method: RoutingMethod::Rules,
        };
    }

    // 3. LLM.
    let Some(llm) = ctx.llm.as_ref() else {
        return fallback(file, ctx, "no LLM provider configured".to_string());
    };
    let request = CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt: build_prompt(file, ctx),
        max_tokens: ctx.max_tokens,
    };
    let reply = match llm.complete(&request).await {
        Ok(text) => text,
        Err(e) => {
            warn!(file = %file.name, error = %e, "llm call failed, using fallback");
            return fallback(file, ctx, format!("AI classification failed: {}", e));
        }
    };
    match parse_llm_reply(&reply) {
        LlmVerdict::Parsed {
            suggested_path,
            confidence,
            mut reasoning,
            alternatives,
        } => {
            if !ctx.template.contains(&suggested_path) {
                debug!(file = %file.name, path = %suggested_path, "model chose a folder outside the template");
                reasoning = format!("{} (folder not in template)", reasoning.trim());
            }
            RoutingSuggestion {
                file: file.clone(),
                suggested_path,
                confidence,
                reasoning,
                alternatives,
                method: RoutingMethod::Ai,
            }
        }
        LlmVerdict::Malformed { reason } => {
            warn!(file = %file.name, %reason, "unusable llm reply, using fallback");
            fallback(file, ctx, format!("AI reply unusable: {}", reason))
        }
    }
}

/// One suggestion per input file, in input order. Files are classified one at
/// a time.
pub async fn classify_all(
    files: &[FileDescriptor],
    ctx: &ClassifierContext<'_>,
) -> Vec<RoutingSuggestion> {
    let mut out = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        let suggestion = classify(file, ctx).await;
        debug!(
            n = i + 1,
            total = files.len(),
            file = %file.name,
            path = %suggestion.suggested_path,
            method = %suggestion.method,
            "classified"
        );
        out.push(suggestion);
    }
    info!(files = out.len(), "classification complete");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FALLBACK_PATH;
    use providers::ProviderError;
    use std::sync::Mutex;

    fn file(name: &str) -> FileDescriptor {
        FileDescriptor {
            id: name.into(),
            name: name.into(),
            size: 10,
            last_modified: 0,
            parent_path: String::new(),
            is_folder: false,
            mime_type: crate::scanner::mime_from_name(name),
        }
    }

    /// Replies from a script keyed by a word in the prompt; fails for "broken".
    struct ScriptedLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if request.prompt.contains("broken") {
                return Err(ProviderError::Api {
                    status: 529,
                    message: "overloaded".into(),
                });
            }
            if request.prompt.contains("garbled") {
                return Ok("I think it goes in the reports folder".into());
            }
            Ok("```json\n{\"suggested_path\": \"RELAZIONI\", \"confidence\": 1.7, \
                \"reasoning\": \"a report\", \"alternatives\": [\"CALCOLI\", \"RELAZIONI/\"]}\n```"
                .into())
        }
    }

    fn scripted() -> Arc<ScriptedLlm> {
        Arc::new(ScriptedLlm {
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn parses_fenced_reply() {
        let v = parse_llm_reply(
            "Sure:\n```json\n{\"suggestedPath\": \"/FOTO\", \"confidence\": 0.72}\n```",
        );
        assert_eq!(
            v,
            LlmVerdict::Parsed {
                suggested_path: "FOTO/".into(),
                confidence: 0.72,
                reasoning: String::new(),
                alternatives: vec![],
            }
        );
    }

    #[test]
    fn malformed_replies_are_tagged() {
        assert!(matches!(parse_llm_reply("nope"), LlmVerdict::Malformed { .. }));
        assert!(matches!(
            parse_llm_reply("{\"confidence\": 0.9}"),
            LlmVerdict::Malformed { .. }
        ));
        assert!(matches!(
            parse_llm_reply("{\"suggested_path\": 3}"),
            LlmVerdict::Malformed { .. }
        ));
    }

    #[test]
    fn replies_leaving_the_project_are_malformed() {
        for reply in [
            "{\"suggested_path\": \"../../outside\", \"confidence\": 0.9}",
            "{\"suggested_path\": \"RELAZIONI/../../x\", \"confidence\": 0.9}",
            "{\"suggested_path\": \"C:\\\\Users\\\\me\", \"confidence\": 0.9}",
        ] {
            assert!(
                matches!(parse_llm_reply(reply), LlmVerdict::Malformed { ref reason } if reason.contains("escapes")),
                "{}",
                reply
            );
        }

        let v = parse_llm_reply(
            "{\"suggested_path\": \"FOTO\", \"alternatives\": [\"../up\", \"CALCOLI\"]}",
        );
        let LlmVerdict::Parsed { alternatives, .. } = v else {
            panic!("expected a parsed reply");
        };
        assert_eq!(alternatives, vec!["CALCOLI/"]);
    }

    #[tokio::test]
    async fn escaping_ai_path_falls_back() {
        struct Escaping;
        #[async_trait::async_trait]
        impl LlmProvider for Escaping {
            async fn complete(&self, _r: &CompletionRequest) -> Result<String, ProviderError> {
                Ok("{\"suggested_path\": \"../../outside\", \"confidence\": 0.9}".into())
            }
        }
        let template = ProjectTemplate::default();
        let ctx = ClassifierContext {
            project_code: "25ABC123",
            template: &template,
            rules: &[],
            learning: None,
            llm: Some(Arc::new(Escaping)),
            fallback_path: FALLBACK_PATH,
            max_tokens: 256,
        };
        let s = classify(&file("x.pdf"), &ctx).await;
        assert_eq!(s.method, RoutingMethod::Fallback);
        assert_eq!(s.suggested_path, FALLBACK_PATH);
        assert_eq!(s.confidence, 0.5);
    }

    #[tokio::test]
    async fn lookup_order_learned_rules_ai() {
        let template = ProjectTemplate::default();
        let rules = rules::rules_from_template(&template);
        let mut learning = LearningStore::in_memory();
        learning.record("tavola_01.dwg", Some("ELABORATI_GRAFICI/"), "FOTO/").unwrap();
        let llm = scripted();
        let ctx = ClassifierContext {
            project_code: "25ABC123",
            template: &template,
            rules: &rules,
            learning: Some(&learning),
            llm: Some(llm.clone()),
            fallback_path: FALLBACK_PATH,
            max_tokens: 256,
        };

        let learned = classify(&file("25ABC123_tavola_01.dwg"), &ctx).await;
        assert_eq!(learned.method, RoutingMethod::Learned);
        assert_eq!(learned.confidence, 1.0);
        assert_eq!(learned.suggested_path, "FOTO/");

        let ruled = classify(&file("fattura_marzo.pdf"), &ctx).await;
        assert_eq!(ruled.method, RoutingMethod::Rules);
        assert_eq!(ruled.suggested_path, "AMMINISTRAZIONE/FATTURE/");

        let ai = classify(&file("documento.pdf"), &ctx).await;
        assert_eq!(ai.method, RoutingMethod::Ai);
        assert_eq!(ai.suggested_path, "RELAZIONI/");
        assert_eq!(ai.confidence, 1.0);
        assert_eq!(ai.alternatives, vec!["CALCOLI/"]);

        // Only the unmatched file reached the model.
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("File name: documento.pdf"));
        assert!(prompts[0].contains("MATERIALE_RICEVUTO/"));
    }

    #[tokio::test]
    async fn one_failing_file_does_not_break_the_batch() {
        let template = ProjectTemplate::default();
        let llm = scripted();
        let ctx = ClassifierContext {
            project_code: "25ABC123",
            template: &template,
            rules: &[],
            learning: None,
            llm: Some(llm),
            fallback_path: FALLBACK_PATH,
            max_tokens: 256,
        };
        let files = vec![file("alpha.pdf"), file("broken.pdf"), file("gamma.pdf")];
        let out = classify_all(&files, &ctx).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[1].suggested_path, FALLBACK_PATH);
        assert_eq!(out[1].confidence, 0.5);
        assert_eq!(out[1].method, RoutingMethod::Fallback);
        assert!(out[1].reasoning.contains("overloaded"));
        assert_eq!(out[0].method, RoutingMethod::Ai);
        assert_eq!(out[2].file.name, "gamma.pdf");
    }

    #[tokio::test]
    async fn garbled_reply_and_missing_provider_fall_back() {
        let template = ProjectTemplate::default();
        let mut ctx = ClassifierContext {
            project_code: "25ABC123",
            template: &template,
            rules: &[],
            learning: None,
            llm: Some(scripted()),
            fallback_path: FALLBACK_PATH,
            max_tokens: 256,
        };
        let s = classify(&file("garbled.pdf"), &ctx).await;
        assert_eq!(s.method, RoutingMethod::Fallback);
        assert!(s.reasoning.contains("no JSON object"));

        ctx.llm = None;
        let s = classify(&file("x.pdf"), &ctx).await;
        assert_eq!(s.suggested_path, FALLBACK_PATH);
        assert_eq!(s.confidence, 0.5);
    }
}

use crate::models::normalize_folder;
use crate::template::ProjectTemplate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    PathPrefix { prefix: String },
    Mime { mime: String },
    Extension { ext: String },
    Keyword { word: String },
    And { all: Vec<Condition> },
    Or { any: Vec<Condition> },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub condition: Condition,
    /// Template folder the file is routed to.
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    pub parent_path: &'a str,
    pub mime: Option<&'a str>,
    pub ext: Option<&'a str>,
    pub words: Vec<String>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        name: &str,
        parent_path: &'a str,
        mime: Option<&'a str>,
        ext: Option<&'a str>,
    ) -> Self {
        Self {
            parent_path,
            mime,
            ext,
            words: words_of(name),
        }
    }
}

/// Lowercase alphanumeric tokens of a file name.
pub fn words_of(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn matches(condition: &Condition, ctx: &RuleContext<'_>) -> bool {
    match condition {
        Condition::PathPrefix { prefix } => ctx.parent_path.starts_with(prefix.as_str()),
        Condition::Mime { mime } => ctx.mime.map(|m| m == mime).unwrap_or(false),
        Condition::Extension { ext } => ctx
            .ext
            .map(|e| e.eq_ignore_ascii_case(ext))
            .unwrap_or(false),
        Condition::Keyword { word } => {
            let word = word.to_lowercase();
            ctx.words.iter().any(|w| w.starts_with(&word))
        }
        Condition::And { all } => all.iter().all(|c| matches(c, ctx)),
        Condition::Or { any } => any.iter().any(|c| matches(c, ctx)),
    }
}

pub fn evaluate<'a>(rules: &'a [Rule], ctx: &RuleContext<'_>) -> Vec<&'a Rule> {
    let mut matched: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.enabled && matches(&r.condition, ctx))
        .collect();
    matched.sort_by_key(|r| r.priority);
    matched
}

/// Keyword rules (priority 10) and extension rules (priority 20) for every
/// template folder that declares hints.
pub fn rules_from_template(template: &ProjectTemplate) -> Vec<Rule> {
    let mut rules = Vec::new();
    for folder in &template.folders {
        if !folder.keywords.is_empty() {
            rules.push(Rule {
                name: format!("{}keywords", folder.path),
                priority: 10,
                enabled: true,
                condition: Condition::Or {
                    any: folder
                        .keywords
                        .iter()
                        .map(|w| Condition::Keyword { word: w.clone() })
                        .collect(),
                },
                target: folder.path.clone(),
            });
        }
        if !folder.extensions.is_empty() {
            rules.push(Rule {
                name: format!("{}extensions", folder.path),
                priority: 20,
                enabled: true,
                condition: Condition::Or {
                    any: folder
                        .extensions
                        .iter()
                        .map(|e| Condition::Extension { ext: e.clone() })
                        .collect(),
                },
                target: folder.path.clone(),
            });
        }
    }
    rules
}

/// Normalizes targets and drops rules pointing outside the template.
pub fn validated(rules: Vec<Rule>, template: &ProjectTemplate) -> Vec<Rule> {
    rules
        .into_iter()
        .filter_map(|mut rule| {
            rule.target = normalize_folder(&rule.target);
            if template.contains(&rule.target) {
                Some(rule)
            } else {
                warn!(rule = %rule.name, target = %rule.target, "rule target not in template, ignored");
                None
            }
        })
        .collect()
}

pub fn load_rules_from_dir(dir: &Path) -> anyhow::Result<Vec<Rule>> {
    let mut rules = Vec::new();
    if !dir.exists() {
        return Ok(rules);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("toml")
        {
            let content = fs::read_to_string(entry.path())?;
            let rule: Rule = toml::from_str(&content)?;
            rules.push(rule);
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(name: &str, ext: Option<&'a str>) -> RuleContext<'a> {
        RuleContext::new(name, "", None, ext)
    }

    #[test]
    fn keyword_matches_word_prefix() {
        let c = Condition::Keyword { word: "tav".into() };
        assert!(matches(&c, &ctx("25ABC123_Tav01_pianta.dwg", Some("dwg"))));
        assert!(!matches(&c, &ctx("ottava.pdf", Some("pdf"))));
    }

    #[test]
    fn template_rules_prefer_keywords_over_extensions() {
        let template = ProjectTemplate::default();
        let rules = rules_from_template(&template);
        // A photo of a drawing: extension says FOTO, keyword says drawings.
        let c = ctx("tavola_cantiere.jpg", Some("jpg"));
        let hits = evaluate(&rules, &c);
        assert_eq!(hits[0].target, "ELABORATI_GRAFICI/");
        assert!(hits.iter().any(|r| r.target == "FOTO/"));
    }

    #[test]
    fn fallback_folder_has_no_rules() {
        let rules = rules_from_template(&ProjectTemplate::default());
        assert!(rules.iter().all(|r| r.target != crate::config::FALLBACK_PATH));
    }

    #[test]
    fn disabled_and_foreign_rules_are_skipped() {
        let template = ProjectTemplate::default();
        let rules = validated(
            vec![
                Rule {
                    name: "off".into(),
                    priority: 1,
                    enabled: false,
                    condition: Condition::Extension { ext: "pdf".into() },
                    target: "RELAZIONI".into(),
                },
                Rule {
                    name: "nowhere".into(),
                    priority: 1,
                    enabled: true,
                    condition: Condition::Extension { ext: "pdf".into() },
                    target: "NOT_THERE/".into(),
                },
            ],
            &template,
        );
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].target, "RELAZIONI/");
        assert!(evaluate(&rules, &ctx("a.pdf", Some("pdf"))).is_empty());
    }

    #[test]
    fn rules_load_from_toml_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("offers.toml"),
            r#"
            name = "offers"
            priority = 1
            enabled = true
            target = "AMMINISTRAZIONE/CONTRATTI/"

            [condition]
            type = "and"

            [[condition.all]]
            type = "keyword"
            word = "offerta"

            [[condition.all]]
            type = "extension"
            ext = "pdf"
            "#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let rules = load_rules_from_dir(dir.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(matches(
            &rules[0].condition,
            &ctx("Offerta_2025.pdf", Some("pdf"))
        ));
    }
}

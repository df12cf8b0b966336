//! Stream filter rules and the rules file that declares them.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A server-side filter predicate with an operator-chosen label.
///
/// `id` is assigned by the provider once the rule is installed; rules read from
/// configuration never carry one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub value: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Rule {
    pub fn new(value: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tag: tag.into(),
            id: None,
        }
    }
}

/// Rules installed when no rules file is given.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new("-is:retweet CONCACAF", "CONCACAF"),
        Rule::new("-is:retweet CONMEBOL", "CONMEBOL"),
        Rule::new("-is:retweet UEFA", "UEFA"),
    ]
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// Parse a TOML rules document:
///
/// ```toml
/// [[rules]]
/// value = "-is:retweet UEFA"
/// tag = "UEFA"
/// ```
pub fn parse_rules(source: &str) -> Result<Vec<Rule>, ConfigError> {
    let file: RulesFile = toml::from_str(source)?;
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(file.rules.len());

    for mut rule in file.rules {
        if rule.value.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "rules.value".into(),
                reason: format!("rule tagged '{}' has an empty filter", rule.tag),
            });
        }
        if rule.tag.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "rules.tag".into(),
                reason: format!("rule '{}' has an empty tag", rule.value),
            });
        }
        if !seen.insert(rule.tag.clone()) {
            return Err(ConfigError::Invalid {
                key: "rules.tag".into(),
                reason: format!("duplicate tag '{}'", rule.tag),
            });
        }
        // Ids belong to the provider.
        rule.id = None;
        rules.push(rule);
    }

    if rules.is_empty() {
        return Err(ConfigError::Invalid {
            key: "rules".into(),
            reason: "rules file declares no rules".into(),
        });
    }

    Ok(rules)
}

/// Load rules from a TOML file on disk.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>, ConfigError> {
    let source = std::fs::read_to_string(path)?;
    let rules = parse_rules(&source)?;
    tracing::info!(path = %path.display(), count = rules.len(), "loaded stream rules");
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_rules_document() {
        let rules = parse_rules(
            r#"
            [[rules]]
            value = "-is:retweet UEFA"
            tag = "UEFA"

            [[rules]]
            value = "cats has:images"
            tag = "cats"
            "#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0], Rule::new("-is:retweet UEFA", "UEFA"));
        assert_eq!(rules[1].tag, "cats");
    }

    #[test]
    fn strips_provider_ids() {
        let rules = parse_rules(
            r#"
            [[rules]]
            value = "x"
            tag = "x"
            id = "123"
            "#,
        )
        .unwrap();
        assert_eq!(rules[0].id, None);
    }

    #[test]
    fn rejects_duplicate_tags() {
        let err = parse_rules(
            r#"
            [[rules]]
            value = "a"
            tag = "same"

            [[rules]]
            value = "b"
            tag = "same"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate tag"));
    }

    #[test]
    fn rejects_empty_rule_set() {
        let err = parse_rules("").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_blank_filter() {
        let err = parse_rules("[[rules]]\nvalue = \"  \"\ntag = \"t\"\n").unwrap_err();
        assert!(err.to_string().contains("empty filter"));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[rules]]\nvalue = \"rust lang\"\ntag = \"rust\"").unwrap();

        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules, vec![Rule::new("rust lang", "rust")]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_rules(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn shipped_rules_file_matches_defaults() {
        let rules = parse_rules(include_str!("../../../config/rules.toml")).unwrap();
        assert_eq!(rules, default_rules());
    }

    #[test]
    fn default_rules_exclude_retweets() {
        let rules = default_rules();
        assert_eq!(rules.len(), 3);
        assert!(rules.iter().all(|r| r.value.starts_with("-is:retweet")));
    }
}

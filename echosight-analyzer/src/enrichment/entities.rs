//! Gazetteer entity extractor
//!
//! Case-sensitive, whole-word phrase lookup. At each word the longest
//! matching phrase wins and matching resumes after it, so "New York" is one
//! entity and never also "York".

use super::{EntityExtractor, RawEntity};
use crate::error::EntityError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_GAZETTEER: &str = include_str!("../../data/gazetteer.toml");

#[derive(Debug, Deserialize)]
struct GazetteerFile {
    #[serde(default)]
    entity: Vec<GazetteerEntry>,
}

#[derive(Debug, Deserialize)]
struct GazetteerEntry {
    text: String,
    label: String,
}

/// Phrase table keyed by words joined with single spaces
pub struct GazetteerExtractor {
    phrases: HashMap<String, String>,
    max_words: usize,
}

impl GazetteerExtractor {
    /// Gazetteer compiled into the binary
    pub fn builtin() -> Result<Self, EntityError> {
        Self::from_toml_str(BUILTIN_GAZETTEER)
    }

    /// Load a gazetteer TOML file from disk
    pub fn load(path: &Path) -> Result<Self, EntityError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EntityError::Load(format!("read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EntityError> {
        let file: GazetteerFile = toml::from_str(content)
            .map_err(|e| EntityError::Load(format!("invalid gazetteer: {}", e)))?;

        let mut phrases = HashMap::with_capacity(file.entity.len());
        let mut max_words = 0;

        for entry in file.entity {
            let words: Vec<&str> = words(&entry.text).collect();
            if words.is_empty() {
                return Err(EntityError::Load(format!(
                    "gazetteer entry '{}' has no words",
                    entry.text
                )));
            }
            max_words = max_words.max(words.len());
            phrases.insert(words.join(" "), entry.label);
        }

        Ok(Self { phrases, max_words })
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl EntityExtractor for GazetteerExtractor {
    fn name(&self) -> &'static str {
        "gazetteer"
    }

    fn extract(&self, text: &str) -> Result<Vec<RawEntity>, EntityError> {
        let tokens: Vec<&str> = words(text).collect();
        let mut found = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let longest = self.max_words.min(tokens.len() - i);
            let hit = (1..=longest).rev().find_map(|n| {
                let phrase = tokens[i..i + n].join(" ");
                self.phrases
                    .get(&phrase)
                    .map(|label| (n, RawEntity::new(phrase, label.clone())))
            });

            match hit {
                Some((n, entity)) => {
                    found.push(entity);
                    i += n;
                }
                None => i += 1,
            }
        }

        Ok(found)
    }
}

/// Words of `text`, with surrounding punctuation and possessive "'s" removed
fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace().filter_map(|raw| {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let word = word
            .strip_suffix("'s")
            .or_else(|| word.strip_suffix("\u{2019}s"))
            .unwrap_or(word);
        (!word.is_empty()).then_some(word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<(String, String)> {
        GazetteerExtractor::builtin()
            .unwrap()
            .extract(text)
            .unwrap()
            .into_iter()
            .map(|e| (e.text, e.label))
            .collect()
    }

    #[test]
    fn test_builtin_loads() {
        let gazetteer = GazetteerExtractor::builtin().unwrap();
        assert!(!gazetteer.is_empty());
        assert!(gazetteer.max_words >= 2);
    }

    #[test]
    fn test_finds_org_and_place() {
        assert_eq!(
            extract("Apple opened a new store in Paris."),
            vec![
                ("Apple".to_string(), "ORG".to_string()),
                ("Paris".to_string(), "GPE".to_string()),
            ]
        );
    }

    #[test]
    fn test_longest_phrase_wins() {
        assert_eq!(
            extract("Flights from New York to San Francisco"),
            vec![
                ("New York".to_string(), "GPE".to_string()),
                ("San Francisco".to_string(), "GPE".to_string()),
            ]
        );
    }

    #[test]
    fn test_case_sensitive_and_whole_word() {
        assert!(extract("an apple a day").is_empty());
        assert!(extract("Applebee's is busy").is_empty());
    }

    #[test]
    fn test_possessive_and_punctuation() {
        assert_eq!(
            extract("(Tesla's) earnings, per Elon Musk!"),
            vec![
                ("Tesla".to_string(), "ORG".to_string()),
                ("Elon Musk".to_string(), "PERSON".to_string()),
            ]
        );
    }

    #[test]
    fn test_reports_raw_labels() {
        assert_eq!(
            extract("The iPhone launches Friday"),
            vec![
                ("iPhone".to_string(), "PRODUCT".to_string()),
                ("Friday".to_string(), "DATE".to_string()),
            ]
        );
    }

    #[test]
    fn test_custom_gazetteer() {
        let gazetteer = GazetteerExtractor::from_toml_str(
            r#"
            [[entity]]
            text = "Echosight Labs"
            label = "ORG"
            "#,
        )
        .unwrap();

        let found = gazetteer.extract("Echosight Labs ships").unwrap();
        assert_eq!(found, vec![RawEntity::new("Echosight Labs", "ORG")]);
        assert!(gazetteer.extract("Apple").unwrap().is_empty());
    }

    #[test]
    fn test_bad_gazetteer_is_load_error() {
        assert!(matches!(
            GazetteerExtractor::from_toml_str("entity = 3"),
            Err(EntityError::Load(_))
        ));
        assert!(matches!(
            GazetteerExtractor::load(Path::new("/nonexistent/gazetteer.toml")),
            Err(EntityError::Load(_))
        ));
    }
}

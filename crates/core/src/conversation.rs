//! Follow-up query rewriting from recent conversation turns.

use crate::error::SearchError;
use crate::models::ConversationTurn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_ENTITIES: usize = 10;
pub const MAX_INJECTED_ENTITIES: usize = 5;
pub const HISTORY_TURNS: usize = 2;

const PRONOUNS: [&str; 14] = [
    "it", "its", "they", "them", "their", "theirs", "this", "that", "these", "those", "he",
    "she", "his", "her",
];

const REFERENCE_PHRASES: [&str; 8] = [
    "what about",
    "how about",
    "compare",
    "the same",
    "mentioned",
    "previous",
    "earlier",
    "above",
];

const STOP_WORDS: [&str; 24] = [
    "the", "and", "for", "with", "this", "that", "from", "what", "about", "into", "are", "was",
    "were", "has", "have", "had", "its", "their", "which", "when", "where", "how", "why", "who",
];

const EXCLUDED: [&str; 8] = [
    "abstract",
    "keywords",
    "thesis",
    "university",
    "references",
    "introduction",
    "summary",
    "gemini",
];

pub struct ConversationManager {
    patterns: Vec<Regex>,
    quoted: Regex,
    error_word: Regex,
}

impl ConversationManager {
    pub fn new() -> Result<Self, SearchError> {
        let patterns = [
            // variety and sample codes: IR64, NSIC-Rc222
            r"\b[A-Z]+(?:-[A-Za-z]+)?-?\d+[A-Za-z0-9]*\b",
            r"\b[A-Z]{3,}\b",
            r"\b[A-Z][a-z]+(?:[A-Z][a-z]+)+\b",
            r"\b\d+(?:\.\d+)?\s?(?:%|(?:mm|cm|km|kg|mg|ha|ppm|dS/m|mL|m|g|L|t)\b)",
        ]
        .into_iter()
        .map(Regex::new)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns,
            quoted: Regex::new(r#""([^"]+)""#)?,
            error_word: Regex::new(r"(?i)\berror\b")?,
        })
    }

    /// Salient tokens of `text`, at most [`MAX_ENTITIES`].
    ///
    /// Failure messages (any text mentioning "error" or carrying
    /// `RESOURCE_EXHAUSTED`) produce no entities.
    pub fn extract_entities(&self, text: &str) -> Vec<String> {
        if self.error_word.is_match(text) || text.contains("RESOURCE_EXHAUSTED") {
            return Vec::new();
        }

        let matched = self
            .patterns
            .iter()
            .flat_map(|pattern| pattern.find_iter(text).map(|found| found.as_str()))
            .chain(
                self.quoted
                    .captures_iter(text)
                    .filter_map(|captures| captures.get(1).map(|found| found.as_str())),
            );

        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for candidate in matched {
            let candidate = candidate.trim();
            let lowered = candidate.to_lowercase();
            if candidate.chars().count() <= 2
                || STOP_WORDS.contains(&lowered.as_str())
                || EXCLUDED.contains(&lowered.as_str())
                || !seen.insert(lowered)
            {
                continue;
            }

            entities.push(candidate.to_string());
            if entities.len() == MAX_ENTITIES {
                break;
            }
        }

        entities
    }

    /// Appends entities from the last turns when `query` refers back to them.
    pub fn resolve_query(&self, query: &str, history: &[ConversationTurn]) -> String {
        if history.is_empty() || !refers_back(query) {
            return query.to_string();
        }

        let query_lowered = query.to_lowercase();
        let mut seen = HashSet::new();
        let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];

        let injected: Vec<String> = recent
            .iter()
            .flat_map(|turn| {
                let mut entities = self.extract_entities(&turn.query);
                entities.extend(self.extract_entities(&turn.overview));
                entities
            })
            .filter(|entity| !query_lowered.contains(&entity.to_lowercase()))
            .filter(|entity| seen.insert(entity.to_lowercase()))
            .take(MAX_INJECTED_ENTITIES)
            .collect();

        if injected.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", query, injected.join(" "))
        }
    }
}

fn refers_back(query: &str) -> bool {
    let lowered = query.to_lowercase();
    let has_pronoun = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|word| PRONOUNS.contains(&word));

    has_pronoun || REFERENCE_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// The ordered turns of one conversation. Turns are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    turns: Vec<ConversationTurn>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
        }
    }

    pub fn record(&mut self, query: impl Into<String>, overview: impl Into<String>) {
        self.turns.push(ConversationTurn {
            query: query.into(),
            overview: overview.into(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConversationManager {
        ConversationManager::new().expect("patterns compile")
    }

    #[test]
    fn entities_follow_pattern_precedence() {
        let text = "IR64 and NSIC-Rc222 under SALT stress; the FieldTrial measured 12 cm roots \"seedling vigor\"";
        let entities = manager().extract_entities(text);

        assert_eq!(
            entities,
            vec!["IR64", "NSIC-Rc222", "NSIC", "SALT", "FieldTrial", "12 cm", "seedling vigor"]
        );
    }

    #[test]
    fn entities_are_deduplicated_filtered_and_capped() {
        let text = "THE AND ABSTRACT ir64 IR64 IR64 AAA BBB CCC DDD EEE FFF GGG HHH III JJJ KKK";
        let entities = manager().extract_entities(text);

        assert_eq!(entities.len(), MAX_ENTITIES);
        assert_eq!(entities[0], "IR64");
        assert!(!entities.iter().any(|entity| entity == "THE" || entity == "ABSTRACT"));
    }

    #[test]
    fn failure_messages_yield_no_entities() {
        let manager = manager();
        assert!(manager.extract_entities("[Gemini error: 429 RESOURCE_EXHAUSTED]").is_empty());
        assert!(manager.extract_entities("An error occurred for IR64").is_empty());
    }

    #[test]
    fn pronoun_query_gains_entities_from_history() {
        let history = vec![ConversationTurn {
            query: "rice salinity".to_string(),
            overview: "IR64 is tolerant to moderate salinity.".to_string(),
        }];

        let resolved = manager().resolve_query("what about its effects?", &history);
        assert_eq!(resolved, "what about its effects? IR64");
    }

    #[test]
    fn query_without_reference_is_unchanged() {
        let history = vec![ConversationTurn {
            query: "rice salinity".to_string(),
            overview: "IR64 is tolerant.".to_string(),
        }];

        let query = "mangrove reforestation in Quezon";
        assert_eq!(manager().resolve_query(query, &history), query);
    }

    #[test]
    fn only_recent_turns_and_novel_entities_are_injected() {
        let history = vec![
            ConversationTurn {
                query: "old".to_string(),
                overview: "PSB-Rc18 was studied.".to_string(),
            },
            ConversationTurn {
                query: "maize".to_string(),
                overview: "NSIC-Rc222 outyielded IR64.".to_string(),
            },
            ConversationTurn {
                query: "pests".to_string(),
                overview: "The BPH outbreak hit IR64.".to_string(),
            },
        ];

        let resolved = manager().resolve_query("compare them with IR64", &history);
        assert_eq!(resolved, "compare them with IR64 NSIC-Rc222 NSIC BPH");
    }

    #[test]
    fn session_appends_turns_in_order() {
        let mut session = ConversationSession::new();
        session.record("first", "one");
        session.record("second", "two");

        let queries: Vec<&str> = session.turns().iter().map(|turn| turn.query.as_str()).collect();
        assert_eq!(queries, vec!["first", "second"]);
    }
}

//! Offline stand-in for an AI provider.
//!
//! Everything here is deterministic text heuristics: keyword extraction,
//! templated follow-up questions, a rough answer-quality score and a
//! plausibility check for stored provider keys. Nothing leaves the process.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::ideas::MAX_SUGGESTED_QUESTIONS;
use crate::models::ApiConfig;

const STOP_WORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "will", "would", "should", "could", "about",
];

const MAX_KEYWORDS: usize = 5;
const PERSONALIZED_QUESTIONS: usize = 2;

/// Base follow-up templates. Also used to seed an empty question table.
pub const BASE_QUESTIONS: &[&str] = &[
    "Who is the target audience for this?",
    "What problem does this solve?",
    "What resources would be needed to implement this?",
    "What are potential challenges or obstacles?",
    "How would you measure success for this idea?",
    "What's the timeline for implementation?",
    "How is this different from existing solutions?",
    "What are the first steps to move this forward?",
];

const RELEVANCE_TERMS: &[&str] = &[
    "challenge", "problem", "solution", "next", "step", "resource", "cost", "time", "process",
    "method", "approach", "strategy",
];

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("valid regex"))
}

fn digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}

fn capitalized_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z][a-z]+").expect("valid regex"))
}

/// Most frequent meaningful words of `text`, ties broken by first appearance.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned = non_word().replace_all(&lowered, "");

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, word) in cleaned.split_whitespace().enumerate() {
        if word.chars().count() <= 3 || STOP_WORDS.contains(&word) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(word, _)| word.to_string())
        .collect()
}

/// Follow-up questions for an idea, at most five.
pub fn suggest_follow_ups(
    _title: &str,
    description: &str,
    category_name: Option<&str>,
) -> Vec<String> {
    let mut templates: Vec<&str> = BASE_QUESTIONS.to_vec();
    let extra: &[&str] = match category_name {
        Some("Product Idea") => &[
            "What key features would differentiate this product?",
            "How would you price this product?",
            "What would the manufacturing or development process look like?",
        ],
        Some("Business") => &[
            "What's the revenue model for this business?",
            "Who are the key competitors?",
            "What initial investment would be needed?",
        ],
        Some("Creative") => &[
            "What inspired this creative idea?",
            "Who is the intended audience?",
            "What emotional response are you hoping to evoke?",
        ],
        _ => &[],
    };
    templates.extend_from_slice(extra);

    let personalized = extract_keywords(description)
        .into_iter()
        .take(PERSONALIZED_QUESTIONS)
        .map(|keyword| format!("How does \"{keyword}\" factor into your overall plan?"));

    templates[..3]
        .iter()
        .map(|t| t.to_string())
        .chain(personalized)
        .chain(templates[3..6].iter().map(|t| t.to_string()))
        .take(MAX_SUGGESTED_QUESTIONS)
        .collect()
}

/// Rough 0–5 signal of how much thought went into an answer.
pub fn answer_quality(answer: &str) -> u8 {
    if answer.is_empty() {
        return 0;
    }

    let mut score = 0u8;
    let length = answer.chars().count();
    if length > 100 {
        score += 2;
    } else if length > 50 {
        score += 1;
    }
    if digits().is_match(answer) {
        score += 1;
    }
    if capitalized_word().is_match(answer) {
        score += 1;
    }
    let lowered = answer.to_lowercase();
    if RELEVANCE_TERMS.iter().any(|term| lowered.contains(term)) {
        score += 1;
    }
    score.min(5)
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub provider: String,
    pub ok: bool,
    pub message: String,
}

/// Simulated provider handshake: only the shape of the stored key is checked.
pub fn check_connection(config: &ApiConfig) -> ConnectionCheck {
    let key = config.api_key.trim();
    let plausible = key.chars().count() >= 8 && !key.chars().any(char::is_whitespace);
    let message = if plausible {
        format!("{} key accepted", config.provider)
    } else {
        format!("{} key looks malformed", config.provider)
    };
    ConnectionCheck {
        provider: config.provider.clone(),
        ok: plausible,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_extract_keywords_counts_and_filters() {
        let keywords = extract_keywords(
            "Solar kettle: a kettle that would boil water. Solar power, kettle design!",
        );
        assert_eq!(keywords[0], "kettle");
        assert_eq!(keywords[1], "solar");
        assert!(!keywords.iter().any(|k| k == "that" || k == "would" || k == "a"));
        assert!(keywords.len() <= 5);
    }

    #[test]
    fn test_suggestions_personalize_and_cap() {
        let suggestions =
            suggest_follow_ups("Kettle", "solar solar kettle kettle kettle", Some("Business"));
        assert_eq!(suggestions.len(), 5);
        assert_eq!(suggestions[0], BASE_QUESTIONS[0]);
        assert_eq!(
            suggestions[3],
            "How does \"kettle\" factor into your overall plan?"
        );
        assert_eq!(
            suggestions[4],
            "How does \"solar\" factor into your overall plan?"
        );
    }

    #[test]
    fn test_suggestions_without_keywords() {
        let suggestions = suggest_follow_ups("Idea", "", None);
        assert_eq!(
            suggestions,
            vec![
                BASE_QUESTIONS[0],
                BASE_QUESTIONS[1],
                BASE_QUESTIONS[2],
                BASE_QUESTIONS[3],
                BASE_QUESTIONS[4],
            ]
        );
    }

    #[test]
    fn test_answer_quality() {
        assert_eq!(answer_quality(""), 0);
        assert_eq!(answer_quality("ok"), 0);
        assert_eq!(
            answer_quality(
                "The next step is to talk to 20 hikers in Denver and check what the \
                 biggest problem is with their current stoves and fuel costs."
            ),
            5
        );
    }

    #[test]
    fn test_check_connection() {
        let now = Utc::now();
        let mut config = ApiConfig {
            id: 1,
            provider: "openai".to_string(),
            api_key: "sk-abcdef123456".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(check_connection(&config).ok);

        config.api_key = "bad key".to_string();
        assert!(!check_connection(&config).ok);
    }
}

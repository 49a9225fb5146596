//! Read-only introspection over rules, learned confidence, and the last decision.

use std::sync::Arc;

use crate::{
    decision::DecisionCache,
    feedback::StatusBoard,
    heuristics::HeuristicStore,
    knowledge::KnowledgeBase,
};

/// Reply to an empty query.
pub const EMPTY_QUERY: &str = "Sorry, I didn't get your question.";
/// Reply when the query matches no pattern.
pub const FALLBACK: &str = "Sorry, I don't understand that question. Try asking me to 'explain R001' or 'what is your confidence in irrigation?'";
/// Reply when a confidence query names no topic.
pub const MISSING_TOPIC: &str =
    "Which tool's confidence are you asking about? (e.g., 'irrigation', 'cooling')";
/// Greeting.
pub const GREETING: &str = "Hello! I am Agri Advisor, a heuristic agent. I make rational decisions for the farm and learn from their outcomes.";

const TOPICS: [(&str, &str); 4] = [
    ("irrigation", "IRRIGATION"),
    ("cooling", "COOLING"),
    ("drainage", "DRAINAGE"),
    ("fertilizer", "FERTILIZER"),
];

/// Pattern-matching responder. Never mutates agent state.
#[derive(Debug, Clone)]
pub struct QueryResponder {
    knowledge: Arc<KnowledgeBase>,
    heuristics: HeuristicStore,
    cache: DecisionCache,
    status: StatusBoard,
}

impl QueryResponder {
    /// Creates a responder over shared read-only views.
    #[must_use]
    pub const fn new(
        knowledge: Arc<KnowledgeBase>,
        heuristics: HeuristicStore,
        cache: DecisionCache,
        status: StatusBoard,
    ) -> Self {
        Self {
            knowledge,
            heuristics,
            cache,
            status,
        }
    }

    /// Answers a free-text question.
    #[must_use]
    pub fn answer(&self, query: &str) -> String {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return EMPTY_QUERY.into();
        }
        let tokens = tokens(&query);

        if query.contains("explain") {
            if let Some(answer) = self.explain(&tokens) {
                return answer;
            }
        }
        if query.contains("confidence") {
            return self.confidence(&query, &tokens);
        }
        if let Some((_, rest)) = query.split_once("status of") {
            let field = rest.trim().trim_end_matches(['?', '.', '!']).trim();
            let field = if field.is_empty() {
                self.status.snapshot().zone
            } else {
                field.to_owned()
            };
            return format!(
                "I'm actively monitoring {field}. All sensors appear to be stable. The last action taken was '{}'.",
                self.status.snapshot().last_action
            );
        }
        if query.contains("why") {
            return format!(
                "My last major decision was based on this context: {}",
                self.cache.last_explanation()
            );
        }
        if query.contains("hello") || query.contains("who are you") {
            return GREETING.into();
        }
        FALLBACK.into()
    }

    fn explain(&self, tokens: &[&str]) -> Option<String> {
        let requested = tokens
            .iter()
            .find(|token| self.knowledge.rule(token).is_some())
            .or_else(|| tokens.iter().rev().find(|token| looks_like_rule_id(token)))?;
        let answer = match self.knowledge.rule(requested) {
            Some(rule) => format!(
                "Rule {} is: '{}' It has a priority of {}.",
                rule.id, rule.log, rule.priority
            ),
            None => format!(
                "Sorry, I don't have a rule named {} in my knowledge base.",
                requested.to_ascii_uppercase()
            ),
        };
        Some(answer)
    }

    fn confidence(&self, query: &str, tokens: &[&str]) -> String {
        let topic = tokens
            .iter()
            .find_map(|token| self.knowledge.rule(token).map(|rule| rule.id.clone()))
            .or_else(|| {
                TOPICS
                    .iter()
                    .find(|(keyword, _)| query.contains(keyword))
                    .map(|(_, fragment)| (*fragment).to_owned())
            });
        let Some(topic) = topic else {
            return MISSING_TOPIC.into();
        };
        match self.heuristics.mean_confidence(&topic) {
            Some(mean) => format!(
                "My current learned confidence for rule {topic} is {:.1}%.",
                mean * 100.0
            ),
            None => format!("I have no learning data for {topic} yet. My default confidence is 100%."),
        }
    }
}

fn tokens(query: &str) -> Vec<&str> {
    query
        .split_whitespace()
        .map(|token| token.trim_matches(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_'))
        .filter(|token| !token.is_empty())
        .collect()
}

fn looks_like_rule_id(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('r' | 'R')) && chars.next().is_some_and(|ch| ch.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decision::DecisionCache,
        feedback::status::DEFAULT_CRITICAL_TIMEOUT,
        heuristics::MemoryStorage,
        knowledge::Rule,
    };

    fn responder() -> (QueryResponder, HeuristicStore, DecisionCache, StatusBoard) {
        let knowledge = Arc::new(
            KnowledgeBase::empty()
                .with_rule(Rule::new(
                    "R006_STANDARD_IRRIGATION",
                    "moisture < 65",
                    "PRECISION_IRRIGATION",
                    1,
                    "Soil moisture is below the optimal band.",
                ))
                .with_rule(Rule::new(
                    "R001_EMERGENCY_COOLING_IRRIGATION_KES",
                    "temp > 30",
                    "EMERGENCY_COOLING",
                    3,
                    "Heat stress.",
                )),
        );
        let heuristics = HeuristicStore::open(Arc::new(MemoryStorage::new()));
        let cache = DecisionCache::default();
        let status = StatusBoard::new("Kenya_Highlands", DEFAULT_CRITICAL_TIMEOUT);
        let responder = QueryResponder::new(knowledge, heuristics.clone(), cache.clone(), status.clone());
        (responder, heuristics, cache, status)
    }

    #[test]
    fn explains_known_and_unknown_rules() {
        let (responder, ..) = responder();
        assert_eq!(
            responder.answer("Please explain r006_standard_irrigation"),
            "Rule R006_STANDARD_IRRIGATION is: 'Soil moisture is below the optimal band.' It has a priority of 1."
        );
        assert_eq!(
            responder.answer("explain R042"),
            "Sorry, I don't have a rule named R042 in my knowledge base."
        );
        assert_eq!(responder.answer("explain yourself"), FALLBACK);
    }

    #[test]
    fn reports_mean_confidence_by_topic() {
        let (responder, heuristics, ..) = responder();
        assert_eq!(responder.answer("what is your confidence?"), MISSING_TOPIC);
        assert_eq!(
            responder.answer("confidence in drainage"),
            "I have no learning data for DRAINAGE yet. My default confidence is 100%."
        );

        heuristics.learn("R006_STANDARD_IRRIGATION", "field_a", false);
        heuristics.learn("R006_STANDARD_IRRIGATION", "field_b", false);
        heuristics.learn("R006_STANDARD_IRRIGATION", "field_b", false);
        assert_eq!(
            responder.answer("What is your confidence in irrigation?"),
            "My current learned confidence for rule IRRIGATION is 70.0%."
        );
        assert_eq!(
            responder.answer("confidence r006_standard_irrigation"),
            "My current learned confidence for rule R006_STANDARD_IRRIGATION is 70.0%."
        );
    }

    #[test]
    fn reads_status_and_last_decision() {
        let (responder, _, cache, status) = responder();
        assert_eq!(
            responder.answer("why did you do that?"),
            "My last major decision was based on this context: No decision has been made yet."
        );
        cache.store("I selected rule R006.");
        status.record_action("PRECISION_IRRIGATION");
        assert_eq!(
            responder.answer("why?"),
            "My last major decision was based on this context: I selected rule R006."
        );
        assert_eq!(
            responder.answer("What is the status of field_a?"),
            "I'm actively monitoring field_a. All sensors appear to be stable. The last action taken was 'PRECISION_IRRIGATION'."
        );
    }

    #[test]
    fn greeting_fallback_and_empty() {
        let (responder, ..) = responder();
        assert_eq!(responder.answer("  "), EMPTY_QUERY);
        assert_eq!(responder.answer("Hello there"), GREETING);
        assert_eq!(responder.answer("plant tomatoes"), FALLBACK);
    }
}

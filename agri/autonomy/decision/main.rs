//! Rule evaluation and confidence-weighted action selection.

/// Sensor readings and prediction model.
pub mod reading;

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tracing::{debug, error};

pub use reading::{PredictionModel, SensorReading, ThresholdModel};

use crate::{
    feedback::status::StatusBoard,
    heuristics::HeuristicStore,
    knowledge::{expr::EvalContext, KnowledgeBase, Rule},
    telemetry::{AutonomyTelemetry, EVENT_DECISION_DEFAULT, EVENT_DECISION_SELECTED},
};

/// Action chosen when no rule matches.
pub const DEFAULT_ACTION: &str = "MONITOR_QUIETLY";
/// Explanation attached to the default action.
pub const DEFAULT_EXPLANATION: &str = "No rules matched the data. I decided to monitor quietly.";
/// Cached explanation before the first decision.
pub const NO_DECISION_YET: &str = "No decision has been made yet.";
/// Context name reserved for the prediction label.
pub const PREDICTION_VARIABLE: &str = "prediction";
/// Context name carrying the reading's target.
pub const FIELD_VARIABLE: &str = "field_id";

const PRIORITY_WEIGHT: f64 = 10.0;
const CONFIDENCE_WEIGHT: f64 = 5.0;

/// Score of one matching rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    /// Matching rule.
    pub rule_id: String,
    /// Rule priority.
    pub priority: i64,
    /// Learned confidence for the target.
    pub confidence: f64,
    /// `priority * 10 + confidence * 5`.
    pub score: f64,
    /// Position in the catalog, used for tie-breaking.
    pub catalog_index: usize,
}

/// Outcome of one `decide` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    /// Action to execute.
    pub chosen_action: String,
    /// Human-readable explanation.
    pub explanation: String,
    /// Number of rules whose condition held.
    pub matched_rule_count: usize,
    /// Number of rules evaluated.
    pub rules_checked: usize,
    /// Winning rule, if any matched.
    pub rule_id: Option<String>,
    /// Target the decision applies to.
    pub target_id: String,
    /// Every matching rule in catalog order.
    pub score_breakdown: Vec<ScoreEntry>,
}

impl DecisionResult {
    /// Key under which feedback for this decision is learned.
    #[must_use]
    pub fn feedback_key(&self) -> &str {
        self.rule_id.as_deref().unwrap_or(DEFAULT_ACTION)
    }
}

/// Last explanation produced, shared with the query responder.
#[derive(Debug, Clone)]
pub struct DecisionCache {
    explanation: Arc<RwLock<String>>,
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self {
            explanation: Arc::new(RwLock::new(NO_DECISION_YET.into())),
        }
    }
}

impl DecisionCache {
    /// Replaces the cached explanation.
    pub fn store(&self, explanation: &str) {
        explanation.clone_into(&mut self.explanation.write());
    }

    /// Current explanation.
    #[must_use]
    pub fn last_explanation(&self) -> String {
        self.explanation.read().clone()
    }
}

/// Selects one action per reading.
#[derive(Clone)]
pub struct DecisionEngine {
    knowledge: Arc<KnowledgeBase>,
    heuristics: HeuristicStore,
    status: StatusBoard,
    cache: DecisionCache,
    telemetry: Option<AutonomyTelemetry>,
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("rules", &self.knowledge.rules().len())
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Creates an engine over a catalog and confidence store.
    #[must_use]
    pub fn new(knowledge: Arc<KnowledgeBase>, heuristics: HeuristicStore, status: StatusBoard) -> Self {
        Self {
            knowledge,
            heuristics,
            status,
            cache: DecisionCache::default(),
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: AutonomyTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Explanation cache written on every decision.
    #[must_use]
    pub const fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    /// Catalog the engine evaluates.
    #[must_use]
    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Evaluation context: reading fields and `field_id`, then thresholds,
    /// then the prediction.
    #[must_use]
    pub fn context(&self, prediction: &str, reading: &SensorReading) -> EvalContext {
        let mut ctx = reading.values.clone();
        ctx.insert(FIELD_VARIABLE.into(), reading.field_id.as_str().into());
        for (name, value) in self.knowledge.thresholds().values() {
            if name != PREDICTION_VARIABLE {
                ctx.insert(name.clone(), value.clone());
            }
        }
        ctx.insert(PREDICTION_VARIABLE.into(), prediction.into());
        ctx
    }

    /// Evaluates every rule, picks the highest-scoring match, and counts the
    /// evaluation on the status board.
    pub fn decide(&self, prediction: &str, reading: &SensorReading) -> DecisionResult {
        let result = self.evaluate(prediction, reading);
        self.status.record_evaluation(result.rules_checked);
        result
    }

    /// Same selection as [`Self::decide`] without touching the status board.
    /// Callers commit `rules_checked` together with the rest of their cycle.
    pub fn evaluate(&self, prediction: &str, reading: &SensorReading) -> DecisionResult {
        let ctx = self.context(prediction, reading);
        let target = reading.field_id.as_str();
        let rules = self.knowledge.rules();

        let score_breakdown: Vec<ScoreEntry> = rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| self.matches(rule, &ctx))
            .map(|(catalog_index, rule)| {
                let confidence = self.heuristics.get(&rule.id, target);
                #[allow(clippy::cast_precision_loss)]
                let score = (rule.priority as f64).mul_add(PRIORITY_WEIGHT, confidence * CONFIDENCE_WEIGHT);
                ScoreEntry {
                    rule_id: rule.id.clone(),
                    priority: rule.priority,
                    confidence,
                    score,
                    catalog_index,
                }
            })
            .collect();

        let winner = score_breakdown.iter().fold(None::<&ScoreEntry>, |best, entry| match best {
            Some(current) if entry.score <= current.score => Some(current),
            _ => Some(entry),
        });

        let result = match winner.map(|entry| (entry, &rules[entry.catalog_index])) {
            Some((entry, rule)) => DecisionResult {
                chosen_action: rule.action.clone(),
                explanation: format!(
                    "I selected rule {} (Priority: {}) with a learned confidence of {:.2}. The reason was: {}",
                    rule.id, rule.priority, entry.confidence, rule.log
                ),
                matched_rule_count: score_breakdown.len(),
                rules_checked: rules.len(),
                rule_id: Some(rule.id.clone()),
                target_id: target.to_owned(),
                score_breakdown: score_breakdown.clone(),
            },
            None => DecisionResult {
                chosen_action: DEFAULT_ACTION.into(),
                explanation: DEFAULT_EXPLANATION.into(),
                matched_rule_count: 0,
                rules_checked: rules.len(),
                rule_id: None,
                target_id: target.to_owned(),
                score_breakdown: Vec::new(),
            },
        };

        self.cache.store(&result.explanation);
        self.emit(prediction, &result);
        result
    }

    fn matches(&self, rule: &Rule, ctx: &EvalContext) -> bool {
        match rule.evaluate(ctx) {
            Ok(matched) => {
                debug!(rule = %rule.id, matched, "rule evaluated");
                matched
            }
            Err(err) => {
                error!(rule = %rule.id, condition = %rule.condition, error = %err, "rule evaluation failed; skipping");
                false
            }
        }
    }

    fn emit(&self, prediction: &str, result: &DecisionResult) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let (event, message) = if result.rule_id.is_some() {
            (EVENT_DECISION_SELECTED, "decision selected")
        } else {
            (EVENT_DECISION_DEFAULT, "no rule matched")
        };
        telemetry.record(
            LogLevel::Info,
            message,
            event,
            json!({
                "prediction": prediction,
                "target": result.target_id,
                "action": result.chosen_action,
                "rule_id": result.rule_id,
                "matched": result.matched_rule_count,
                "rules_checked": result.rules_checked,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        feedback::status::DEFAULT_CRITICAL_TIMEOUT,
        heuristics::MemoryStorage,
        knowledge::expr::Value,
    };

    fn engine(knowledge: KnowledgeBase) -> (DecisionEngine, HeuristicStore, StatusBoard) {
        let heuristics = HeuristicStore::open(Arc::new(MemoryStorage::new()));
        let status = StatusBoard::new("zone", DEFAULT_CRITICAL_TIMEOUT);
        let engine = DecisionEngine::new(Arc::new(knowledge), heuristics.clone(), status.clone());
        (engine, heuristics, status)
    }

    fn hot_dry() -> SensorReading {
        SensorReading::new("field_a").with("moisture", 40.0).with("temp", 35.0)
    }

    #[test]
    fn higher_priority_wins_on_score() {
        let knowledge = KnowledgeBase::empty()
            .with_rule(Rule::new("R_LOW", "moisture < 50", "LOG_DRY_SOIL", 1, "dry"))
            .with_rule(Rule::new("R_HIGH", "temp > 30", "EMERGENCY_COOLING", 2, "hot"));
        let (engine, _, status) = engine(knowledge);

        let result = engine.decide("Critical Drought Warning", &hot_dry());
        assert_eq!(result.rule_id.as_deref(), Some("R_HIGH"));
        assert_eq!(result.chosen_action, "EMERGENCY_COOLING");
        assert_eq!(result.matched_rule_count, 2);
        let scores: Vec<f64> = result.score_breakdown.iter().map(|entry| entry.score).collect();
        assert_eq!(scores, vec![15.0, 25.0]);
        assert_eq!(
            result.explanation,
            "I selected rule R_HIGH (Priority: 2) with a learned confidence of 1.00. The reason was: hot"
        );
        assert_eq!(status.snapshot().rules_checked, 2);
        assert_eq!(engine.cache().last_explanation(), result.explanation);
    }

    #[test]
    fn learned_confidence_shifts_the_winner() {
        let knowledge = KnowledgeBase::empty()
            .with_rule(Rule::new("R_A", "moisture < 50", "A", 2, "a"))
            .with_rule(Rule::new("R_B", "temp > 30", "B", 2, "b"));
        let (engine, heuristics, _) = engine(knowledge);
        heuristics.learn("R_A", "field_a", false);

        let result = engine.decide("", &hot_dry());
        assert_eq!(result.rule_id.as_deref(), Some("R_B"));
        assert!((result.score_breakdown[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn ties_go_to_catalog_order_deterministically() {
        let knowledge = KnowledgeBase::empty()
            .with_rule(Rule::new("R_FIRST", "moisture < 50", "A", 1, "a"))
            .with_rule(Rule::new("R_SECOND", "moisture < 60", "B", 1, "b"));
        let (engine, _, _) = engine(knowledge);
        let first = engine.decide("", &hot_dry());
        for _ in 0..5 {
            assert_eq!(engine.decide("", &hot_dry()), first);
        }
        assert_eq!(first.rule_id.as_deref(), Some("R_FIRST"));
    }

    #[test]
    fn failing_rules_are_isolated() {
        let knowledge = KnowledgeBase::empty()
            .with_rule(Rule::new("R_UNKNOWN", "rainfall > 3", "A", 9, "a"))
            .with_rule(Rule::new("R_TYPE", "nutrient_level > 3", "B", 9, "b"))
            .with_rule(Rule::new("R_PARSE", "moisture <", "C", 9, "c"))
            .with_rule(Rule::new("R_OK", "nutrient_level == 'Low'", "D", 1, "d"));
        let (engine, _, _) = engine(knowledge);
        let reading = hot_dry().with("nutrient_level", "Low");
        let result = engine.decide("", &reading);
        assert_eq!(result.rule_id.as_deref(), Some("R_OK"));
        assert_eq!(result.rules_checked, 4);
    }

    #[test]
    fn no_match_falls_back_to_monitoring() {
        let (engine, _, status) = engine(KnowledgeBase::empty());
        assert_eq!(engine.cache().last_explanation(), NO_DECISION_YET);
        let result = engine.decide("All Metrics Stable", &hot_dry());
        assert_eq!(result.chosen_action, DEFAULT_ACTION);
        assert_eq!(result.explanation, DEFAULT_EXPLANATION);
        assert_eq!(result.feedback_key(), DEFAULT_ACTION);
        assert_eq!(status.snapshot().total_decisions, 1);
    }

    #[test]
    fn field_id_scopes_rules_to_a_target() {
        let knowledge = KnowledgeBase::empty()
            .with_rule(Rule::new("R_FIELD", "field_id == 'field_a' and moisture < 50", "A", 1, "a"));
        let (engine, _, _) = engine(knowledge);

        let reading: SensorReading =
            serde_json::from_value(serde_json::json!({ "field_id": "field_a", "moisture": 40 })).unwrap();
        assert_eq!(engine.decide("", &reading).rule_id.as_deref(), Some("R_FIELD"));

        let elsewhere = SensorReading::new("field_b").with("moisture", 40.0);
        assert_eq!(engine.decide("", &elsewhere).rule_id, None);
    }

    #[test]
    fn evaluate_leaves_status_untouched() {
        let knowledge = KnowledgeBase::empty().with_rule(Rule::new("R_A", "moisture < 50", "A", 1, "a"));
        let (engine, _, status) = engine(knowledge);
        let result = engine.evaluate("", &hot_dry());
        assert_eq!(result.rules_checked, 1);
        assert_eq!(status.snapshot().total_decisions, 0);
        assert_eq!(engine.cache().last_explanation(), result.explanation);
    }

    #[test]
    fn prediction_is_visible_and_reserved() {
        let knowledge = KnowledgeBase::from_json_str(
            r#"{
                "safety_thresholds": { "prediction": "spoofed", "moisture": 99, "min_moisture": 45 },
                "decision_rules": [
                    { "id": "R_PRED", "condition": "prediction == 'Critical Drought Warning' and moisture > min_moisture", "action": "A", "priority": 1 }
                ]
            }"#,
        )
        .unwrap();
        let (engine, _, _) = engine(knowledge);
        let ctx = engine.context("Critical Drought Warning", &hot_dry());
        assert_eq!(ctx.get("prediction"), Some(&Value::from("Critical Drought Warning")));
        assert_eq!(ctx.get("moisture"), Some(&Value::Number(99.0)));
        let result = engine.decide("Critical Drought Warning", &hot_dry());
        assert_eq!(result.rule_id.as_deref(), Some("R_PRED"));
    }
}

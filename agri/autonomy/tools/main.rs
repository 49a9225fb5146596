//! Simulated field equipment.

/// Injectable randomness for tool outcomes.
pub mod outcome;

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tracing::{info, warn};

pub use outcome::{FixedOutcomes, OutcomeSource, SeededOutcomes};

use crate::{error::ToolExecutionError, knowledge::KnowledgeBase, telemetry::AutonomyTelemetry};

/// Prefix some catalogs put in front of action names.
pub const ACTION_PREFIX: &str = "ACTION: ";
/// Default probability that a physical action fails.
pub const DEFAULT_FAILURE_PROBABILITY: f64 = 0.1;

/// Result of one simulated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Equipment that ran.
    pub tool_id: String,
    /// Cost charged in KES.
    pub cost: f64,
    /// Whether the equipment reported success.
    pub success: bool,
    /// Operator-facing message.
    pub message: String,
    /// Action as requested, passed through for feedback correlation.
    pub rule_id: String,
}

/// Strips the catalog prefix from an action name.
#[must_use]
pub fn normalize_action(action: &str) -> &str {
    action.strip_prefix(ACTION_PREFIX).unwrap_or(action).trim()
}

/// Monitoring and logging actions never fail.
#[must_use]
pub fn is_monitoring_action(action: &str) -> bool {
    let action = normalize_action(action);
    action.contains("MONITOR") || action.contains("LOG")
}

/// Advisory daily budget check.
#[must_use]
pub fn within_budget(cost: f64, limit: f64) -> bool {
    cost <= limit
}

/// Resolves actions against the tool table and simulates their outcome.
pub struct ToolExecutor {
    knowledge: Arc<KnowledgeBase>,
    outcomes: Mutex<Box<dyn OutcomeSource>>,
    failure_probability: f64,
    telemetry: Option<AutonomyTelemetry>,
}

impl fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.knowledge.tools().len())
            .field("failure_probability", &self.failure_probability)
            .finish_non_exhaustive()
    }
}

impl ToolExecutor {
    /// Creates an executor with the default failure probability.
    #[must_use]
    pub fn new(knowledge: Arc<KnowledgeBase>, outcomes: Box<dyn OutcomeSource>) -> Self {
        Self {
            knowledge,
            outcomes: Mutex::new(outcomes),
            failure_probability: DEFAULT_FAILURE_PROBABILITY,
            telemetry: None,
        }
    }

    /// Overrides the failure probability, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = if probability.is_nan() {
            DEFAULT_FAILURE_PROBABILITY
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// Attaches telemetry for execution records.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: AutonomyTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Effective failure probability.
    #[must_use]
    pub const fn failure_probability(&self) -> f64 {
        self.failure_probability
    }

    /// Executes `action` for `target_id`.
    pub fn execute(
        &self,
        action: &str,
        target_id: &str,
    ) -> Result<ExecutionResult, ToolExecutionError> {
        let name = normalize_action(action);
        let tool = self
            .knowledge
            .tools()
            .get(name)
            .ok_or_else(|| ToolExecutionError::UnknownAction(name.to_owned()))?;

        let limit = self.knowledge.thresholds().max_daily_cost_kes;
        if !within_budget(tool.cost, limit) {
            warn!(action = name, cost = tool.cost, limit, "tool cost exceeds the daily budget");
        }

        let monitoring = is_monitoring_action(name);
        let success = monitoring || self.outcomes.lock().draw() >= self.failure_probability;
        let message = if success {
            format!("Tool {} ({name}) executed successfully.", tool.tool_id)
        } else {
            format!("Tool {} ({name}) reported a failure.", tool.tool_id)
        };
        info!(action = name, target = target_id, tool = %tool.tool_id, success, "tool executed");

        if let Some(telemetry) = &self.telemetry {
            let level = if monitoring {
                LogLevel::Info
            } else {
                LogLevel::Critical
            };
            if let Err(err) = telemetry.log(
                level,
                &message,
                json!({
                    "action": name,
                    "target": target_id,
                    "tool_id": tool.tool_id,
                    "cost_kes": tool.cost,
                    "success": success,
                }),
            ) {
                warn!(error = ?err, "tool telemetry write failed");
            }
        }

        Ok(ExecutionResult {
            tool_id: tool.tool_id.clone(),
            cost: tool.cost,
            success,
            message,
            rule_id: action.to_owned(),
        })
    }
}

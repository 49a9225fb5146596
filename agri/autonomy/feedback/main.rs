//! One decision cycle: decide, execute, learn, report.

/// Shared agent status.
pub mod status;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tracing::{error, warn};
use uuid::Uuid;

pub use status::{AgentHealth, AgentStatus, StatusBoard};

use crate::{
    decision::{DecisionEngine, DecisionResult, SensorReading},
    error::ToolExecutionError,
    heuristics::HeuristicStore,
    monitor::interlock::SafetyInterlock,
    telemetry::{AutonomyTelemetry, EVENT_CYCLE_COMPLETED},
    tools::{ExecutionResult, ToolExecutor},
};

/// Everything that happened in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// Prediction label the decision was made under.
    pub prediction: String,
    /// Engine output.
    pub decision: DecisionResult,
    /// Executor output, or the error it raised.
    pub execution: Result<ExecutionResult, ToolExecutionError>,
    /// Feedback fed into the heuristic store.
    pub success: bool,
    /// Confidence for the feedback key after learning.
    pub confidence: f64,
    /// Interlock state when the cycle finished.
    pub interlock_active: bool,
    /// Unique cycle id.
    pub cycle_id: Uuid,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// Ties the engine, executor, and heuristic store together.
#[derive(Clone)]
pub struct FeedbackCoordinator {
    engine: DecisionEngine,
    executor: Arc<ToolExecutor>,
    heuristics: HeuristicStore,
    status: StatusBoard,
    interlock: Arc<dyn SafetyInterlock>,
    telemetry: Option<AutonomyTelemetry>,
}

impl std::fmt::Debug for FeedbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackCoordinator")
            .field("engine", &self.engine)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl FeedbackCoordinator {
    /// Creates a coordinator from its collaborators.
    #[must_use]
    pub fn new(
        engine: DecisionEngine,
        executor: Arc<ToolExecutor>,
        heuristics: HeuristicStore,
        status: StatusBoard,
        interlock: Arc<dyn SafetyInterlock>,
    ) -> Self {
        Self {
            engine,
            executor,
            heuristics,
            status,
            interlock,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: AutonomyTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Runs one cycle. Executor errors count as failures and never abort it.
    pub fn decide_and_act(&self, prediction: &str, reading: &SensorReading) -> DecisionOutcome {
        let decision = self.engine.evaluate(prediction, reading);
        let execution = self.executor.execute(&decision.chosen_action, &decision.target_id);
        let success = match &execution {
            Ok(result) => result.success,
            Err(err) => {
                warn!(action = %decision.chosen_action, error = %err, "execution failed; recording negative feedback");
                false
            }
        };

        let learned = self
            .heuristics
            .learn(decision.feedback_key(), &decision.target_id, success);
        let interlock_active = self.status.record_cycle(
            decision.rules_checked,
            &decision.chosen_action,
            self.interlock.as_ref(),
        );

        let outcome = DecisionOutcome {
            prediction: prediction.to_owned(),
            decision,
            execution,
            success,
            confidence: learned.confidence,
            interlock_active,
            cycle_id: Uuid::new_v4(),
            completed_at: Utc::now(),
        };

        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                if success { LogLevel::Info } else { LogLevel::Warn },
                "decision cycle completed",
                EVENT_CYCLE_COMPLETED,
                json!({
                    "cycle_id": outcome.cycle_id.to_string(),
                    "action": outcome.decision.chosen_action,
                    "target": outcome.decision.target_id,
                    "success": success,
                    "confidence": outcome.confidence,
                    "interlock_active": outcome.interlock_active,
                }),
            );
        }
        outcome
    }

    /// Records a monitor-raised alert as the latest action.
    pub fn record_alert(&self, action: &str, detail: &str) {
        self.status.record_action(action);
        error!(action, detail, "critical alert raised");
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.log(
                LogLevel::Critical,
                detail,
                json!({ "action": action }),
            ) {
                warn!(error = ?err, "alert telemetry write failed");
            }
        }
    }

    /// Explanation of the most recent decision.
    #[must_use]
    pub fn last_explanation(&self) -> String {
        self.engine.cache().last_explanation()
    }

    /// Engine driving the cycles.
    #[must_use]
    pub const fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        self.status.snapshot()
    }

    /// Recorded status snapshots, oldest first.
    #[must_use]
    pub fn status_history(&self) -> Vec<AgentStatus> {
        self.status.history()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::{
        decision::DEFAULT_ACTION,
        error::StorageError,
        feedback::status::INITIAL_ACTION,
        heuristics::{HeuristicMap, HeuristicStorage, MemoryStorage},
        knowledge::{KnowledgeBase, Rule, ToolDefinition},
        monitor::interlock::AtomicInterlock,
        tools::FixedOutcomes,
    };

    fn coordinator(knowledge: KnowledgeBase, outcomes: FixedOutcomes) -> (FeedbackCoordinator, HeuristicStore) {
        let (coordinator, heuristics, _) =
            coordinator_with_storage(knowledge, outcomes, |_| Arc::new(MemoryStorage::new()));
        (coordinator, heuristics)
    }

    fn coordinator_with_storage(
        knowledge: KnowledgeBase,
        outcomes: FixedOutcomes,
        storage: impl FnOnce(StatusBoard) -> Arc<dyn HeuristicStorage>,
    ) -> (FeedbackCoordinator, HeuristicStore, StatusBoard) {
        let knowledge = Arc::new(knowledge);
        let status = StatusBoard::new("Kenya_Highlands", status::DEFAULT_CRITICAL_TIMEOUT);
        let heuristics = HeuristicStore::open(storage(status.clone()));
        let engine = DecisionEngine::new(knowledge.clone(), heuristics.clone(), status.clone());
        let executor = Arc::new(ToolExecutor::new(knowledge, Box::new(outcomes)));
        let coordinator = FeedbackCoordinator::new(
            engine,
            executor,
            heuristics.clone(),
            status.clone(),
            Arc::new(AtomicInterlock::default()),
        );
        (coordinator, heuristics, status)
    }

    /// Captures the status board every time the heuristic store persists.
    struct SnapshotOnSave {
        status: StatusBoard,
        seen: Mutex<Vec<AgentStatus>>,
    }

    impl HeuristicStorage for SnapshotOnSave {
        fn load(&self) -> Result<Option<HeuristicMap>, StorageError> {
            Ok(None)
        }

        fn save(&self, _records: &HeuristicMap) -> Result<(), StorageError> {
            self.seen.lock().push(self.status.snapshot());
            Ok(())
        }
    }

    fn irrigation_catalog() -> KnowledgeBase {
        KnowledgeBase::empty()
            .with_rule(Rule::new(
                "R001_IRRIGATION",
                "moisture < 50",
                "ACTION: PRECISION_IRRIGATION",
                2,
                "Soil is dry.",
            ))
            .with_tool(
                "PRECISION_IRRIGATION",
                ToolDefinition {
                    tool_id: "T001".into(),
                    cost: 1200.0,
                },
            )
    }

    fn dry() -> SensorReading {
        SensorReading::new("field_a").with("moisture", 40.0)
    }

    #[test]
    fn successful_cycle_updates_everything() {
        let (coordinator, heuristics) = coordinator(irrigation_catalog(), FixedOutcomes::always_succeed());
        let outcome = coordinator.decide_and_act("Optimal Irrigation Recommended", &dry());
        assert!(outcome.success);
        assert!(outcome.execution.is_ok());
        assert!(outcome.interlock_active);
        assert_eq!(heuristics.snapshot()["R001_IRRIGATION@field_a"].successes, 1);

        let status = coordinator.status();
        assert_eq!(status.last_action, "ACTION: PRECISION_IRRIGATION");
        assert_eq!(status.total_decisions, 1);
        assert!(coordinator.last_explanation().contains("Soil is dry."));
    }

    #[test]
    fn failed_result_and_raised_error_feed_back_identically() {
        let (failing, failing_store) = coordinator(irrigation_catalog(), FixedOutcomes::always_fail());
        let failed = failing.decide_and_act("", &dry());
        assert!(!failed.success);
        assert!(failed.execution.is_ok());

        let unknown = KnowledgeBase::empty().with_rule(Rule::new(
            "R001_IRRIGATION",
            "moisture < 50",
            "LAUNCH_DRONES",
            2,
            "",
        ));
        let (raising, raising_store) = coordinator(unknown, FixedOutcomes::always_succeed());
        let raised = raising.decide_and_act("", &dry());
        assert!(!raised.success);
        assert_eq!(
            raised.execution,
            Err(ToolExecutionError::UnknownAction("LAUNCH_DRONES".into()))
        );

        let key = "R001_IRRIGATION@field_a";
        assert_eq!(failing_store.snapshot()[key], raising_store.snapshot()[key]);
        assert_eq!(raising_store.snapshot()[key].failures, 1);
        assert!((raised.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn unmatched_cycle_learns_under_default_action() {
        let (coordinator, heuristics) = coordinator(KnowledgeBase::empty(), FixedOutcomes::always_succeed());
        let outcome = coordinator.decide_and_act("", &SensorReading::new("field_b"));
        assert_eq!(outcome.decision.chosen_action, DEFAULT_ACTION);
        // The default action has no tool entry in an empty catalog.
        assert!(outcome.execution.is_err());
        assert_eq!(heuristics.snapshot()["MONITOR_QUIETLY@field_b"].failures, 1);
    }

    #[test]
    fn status_is_committed_once_per_cycle() {
        let spy = std::sync::OnceLock::<Arc<SnapshotOnSave>>::new();
        let (coordinator, _, status) =
            coordinator_with_storage(irrigation_catalog(), FixedOutcomes::always_succeed(), |status| {
                let storage = Arc::new(SnapshotOnSave {
                    status,
                    seen: Mutex::new(Vec::new()),
                });
                let _ = spy.set(Arc::clone(&storage));
                storage
            });

        coordinator.decide_and_act("", &dry());

        let seen = spy.get().unwrap().seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].total_decisions, 0);
        assert_eq!(seen[0].last_action, INITIAL_ACTION);

        let after = status.snapshot();
        assert_eq!(after.total_decisions, 1);
        assert_eq!(after.rules_checked, 1);
        assert_eq!(after.last_action, "ACTION: PRECISION_IRRIGATION");
        assert!(after.interlock_active);
        assert_eq!(coordinator.status_history(), vec![after]);
    }

    #[test]
    fn alerts_update_last_action() {
        let (coordinator, _) = coordinator(KnowledgeBase::empty(), FixedOutcomes::always_succeed());
        coordinator.record_alert("CRITICAL_ALERT", "Conflict Observed in Kenya_Highlands System");
        assert_eq!(coordinator.status().last_action, "CRITICAL_ALERT");
    }
}

//! Runtime entrypoints wiring the decision loop and the monitor together.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::AgentConfig,
    decision::{PredictionModel, SensorReading},
    feedback::{AgentStatus, DecisionOutcome, FeedbackCoordinator, StatusBoard},
    heuristics::HeuristicStore,
    knowledge::KnowledgeBase,
    maker::AutonomyRuntimeBuilder,
    monitor::{AutonomyMonitor, SafetyInterlock},
    query::QueryResponder,
    telemetry::AutonomyTelemetry,
};

/// Components assembled by [`AutonomyRuntimeBuilder`].
pub struct RuntimeParts {
    /// Effective configuration.
    pub config: AgentConfig,
    /// Loaded catalog.
    pub knowledge: Arc<KnowledgeBase>,
    /// Learned confidence.
    pub heuristics: HeuristicStore,
    /// Shared status.
    pub status: StatusBoard,
    /// Safety interlock.
    pub interlock: Arc<dyn SafetyInterlock>,
    /// Decision cycle driver.
    pub coordinator: FeedbackCoordinator,
    /// Resource monitor.
    pub monitor: Arc<AutonomyMonitor>,
    /// Introspection.
    pub responder: QueryResponder,
    /// Prediction supplier.
    pub model: Arc<dyn PredictionModel>,
    /// Telemetry sinks.
    pub telemetry: AutonomyTelemetry,
}

/// Fully wired agent: decision cycles on demand plus a background monitor.
pub struct AutonomyRuntime {
    config: AgentConfig,
    knowledge: Arc<KnowledgeBase>,
    heuristics: HeuristicStore,
    status: StatusBoard,
    interlock: Arc<dyn SafetyInterlock>,
    coordinator: FeedbackCoordinator,
    monitor: Arc<AutonomyMonitor>,
    responder: QueryResponder,
    model: Arc<dyn PredictionModel>,
    telemetry: AutonomyTelemetry,
    shutdown: CancellationToken,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AutonomyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutonomyRuntime")
            .field("config", &self.config)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl AutonomyRuntime {
    /// Bootstraps the runtime with production collaborators.
    pub fn bootstrap(config: AgentConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Returns a builder.
    #[must_use]
    pub const fn builder(config: AgentConfig) -> AutonomyRuntimeBuilder {
        AutonomyRuntimeBuilder::new(config)
    }

    /// Assembles a runtime from prebuilt parts.
    #[must_use]
    pub fn from_parts(parts: RuntimeParts) -> Self {
        info!(
            rules = parts.knowledge.rules().len(),
            tools = parts.knowledge.tools().len(),
            learned = parts.heuristics.len(),
            threshold = parts.monitor.threshold(),
            "autonomy runtime ready"
        );
        Self {
            config: parts.config,
            knowledge: parts.knowledge,
            heuristics: parts.heuristics,
            status: parts.status,
            interlock: parts.interlock,
            coordinator: parts.coordinator,
            monitor: parts.monitor,
            responder: parts.responder,
            model: parts.model,
            telemetry: parts.telemetry,
            shutdown: CancellationToken::new(),
            monitor_task: Mutex::new(None),
        }
    }

    /// Runs one decision cycle under an explicit prediction.
    pub fn decide_and_act(&self, prediction: &str, reading: &SensorReading) -> DecisionOutcome {
        self.coordinator.decide_and_act(prediction, reading)
    }

    /// Predicts with the configured model, then runs a cycle.
    pub fn process_reading(&self, reading: &SensorReading) -> DecisionOutcome {
        let prediction = self.model.predict(reading);
        self.decide_and_act(&prediction, reading)
    }

    /// Status snapshot with the interlock mirrored in.
    #[must_use]
    pub fn runtime_status(&self) -> AgentStatus {
        let mut status = self.status.snapshot();
        status.interlock_active = self.interlock.is_active();
        status
    }

    /// Status snapshots recorded by cycles and monitor polls, oldest first.
    #[must_use]
    pub fn status_history(&self) -> Vec<AgentStatus> {
        self.status.history()
    }

    /// Answers an introspective question.
    #[must_use]
    pub fn answer(&self, query: &str) -> String {
        self.responder.answer(query)
    }

    /// Whether the safety interlock is still engaged.
    #[must_use]
    pub fn interlock_active(&self) -> bool {
        self.interlock.is_active()
    }

    /// Starts the monitor on the current tokio runtime. Returns `false` when
    /// it is already running.
    pub fn start_monitor(&self) -> bool {
        let mut task = self.monitor_task.lock();
        if task.is_some() {
            return false;
        }
        *task = Some(
            Arc::clone(&self.monitor).spawn(self.config.heartbeat(), self.shutdown.child_token()),
        );
        true
    }

    /// Cancels the monitor, waits for it, and flushes learned confidence.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.monitor_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "monitor task ended abnormally");
            }
        }
        if let Err(err) = self.heuristics.flush() {
            warn!(error = %err, "final heuristic flush failed");
        }
        if let Err(err) = self.telemetry.log(
            LogLevel::Info,
            "autonomy runtime stopped",
            json!({ "status": self.runtime_status() }),
        ) {
            warn!(error = ?err, "shutdown telemetry write failed");
        }
        info!("autonomy runtime stopped");
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Loaded catalog.
    #[must_use]
    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Learned confidence.
    #[must_use]
    pub const fn heuristics(&self) -> &HeuristicStore {
        &self.heuristics
    }

    /// Resource monitor.
    #[must_use]
    pub const fn monitor(&self) -> &Arc<AutonomyMonitor> {
        &self.monitor
    }
}

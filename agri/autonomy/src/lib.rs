#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Agri autonomy kernel: rule-driven field decisions with learned confidence,
//! simulated actuation, and a resource monitor guarding the safety interlock.

/// Runtime configuration.
#[path = "../config.rs"]
pub mod config;

/// Decision engine and sensor readings.
#[path = "../decision/main.rs"]
pub mod decision;

/// Error types.
#[path = "../error.rs"]
pub mod error;

/// Decision cycle coordination and agent status.
#[path = "../feedback/main.rs"]
pub mod feedback;

/// Learned confidence store.
#[path = "../heuristics/main.rs"]
pub mod heuristics;

/// Rule catalog and condition language.
#[path = "../knowledge/main.rs"]
pub mod knowledge;

/// Runtime builder.
#[path = "../maker.rs"]
pub mod maker;

/// Resource monitor and safety interlock.
#[path = "../monitor/main.rs"]
pub mod monitor;

/// Introspective query responder.
#[path = "../query/main.rs"]
pub mod query;

/// Telemetry helpers.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Simulated tool execution.
#[path = "../tools/main.rs"]
pub mod tools;

/// Runtime entrypoints and orchestration helpers.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use config::AgentConfig;
pub use decision::{
    DecisionEngine, DecisionResult, PredictionModel, ScoreEntry, SensorReading, ThresholdModel,
};
pub use error::{AutonomyError, ExprError, StorageError, ToolExecutionError};
pub use feedback::{AgentHealth, AgentStatus, DecisionOutcome, FeedbackCoordinator};
pub use heuristics::{HeuristicRecord, HeuristicStore};
pub use knowledge::{KnowledgeBase, Rule, SafetyThresholds, ToolDefinition};
pub use maker::AutonomyRuntimeBuilder;
pub use monitor::{AutonomyMonitor, MonitorState, SafetyInterlock};
pub use orchestration_entry::AutonomyRuntime;
pub use query::QueryResponder;
pub use telemetry::{AutonomyTelemetry, AutonomyTelemetryBuilder};
pub use tools::{ExecutionResult, ToolExecutor};

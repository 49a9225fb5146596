//! Periodic resource monitor owning the conflict/escalation state machine.
//!
//! Escalation disables the safety interlock and nothing re-arms it, so once
//! a conflict is observed the monitor stays `Escalated` for the process
//! lifetime.

/// Safety interlock accessor.
pub mod interlock;
/// Resource utilization samplers.
pub mod sampler;

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use interlock::{AtomicInterlock, SafetyInterlock};
pub use sampler::{ResourceSampler, ScriptedSampler, SystemSampler};

use crate::{
    feedback::{FeedbackCoordinator, StatusBoard},
    telemetry::{AutonomyTelemetry, EVENT_INTERLOCK_ESCALATED, EVENT_MONITOR_CONFLICT},
};

/// Default utilization threshold in percent.
pub const DEFAULT_RESOURCE_THRESHOLD: f64 = 60.0;
/// Default heartbeat between iterations.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(3);

/// Monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    /// No conflict observed.
    Normal,
    /// Conflict observed; the alert is being raised.
    ConflictDetected,
    /// Interlock disabled. Terminal.
    Escalated,
}

/// Samples utilization and escalates on conflict.
pub struct AutonomyMonitor {
    coordinator: FeedbackCoordinator,
    status: StatusBoard,
    interlock: Arc<dyn SafetyInterlock>,
    sampler: Mutex<Box<dyn ResourceSampler>>,
    threshold: f64,
    critical_action: String,
    location: String,
    state: Mutex<MonitorState>,
    telemetry: Option<AutonomyTelemetry>,
}

impl std::fmt::Debug for AutonomyMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutonomyMonitor")
            .field("threshold", &self.threshold)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl AutonomyMonitor {
    /// Creates a monitor; the critical action and location come from knowledge.
    #[must_use]
    pub fn new(
        coordinator: FeedbackCoordinator,
        status: StatusBoard,
        interlock: Arc<dyn SafetyInterlock>,
        sampler: Box<dyn ResourceSampler>,
    ) -> Self {
        let knowledge = coordinator.engine().knowledge();
        let critical_action = knowledge.thresholds().conflict_critical_action.clone();
        let location = knowledge.location().to_owned();
        Self {
            coordinator,
            status,
            interlock,
            sampler: Mutex::new(sampler),
            threshold: DEFAULT_RESOURCE_THRESHOLD,
            critical_action,
            location,
            state: Mutex::new(MonitorState::Normal),
            telemetry: None,
        }
    }

    /// Overrides the utilization threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: AutonomyTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Effective utilization threshold.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    /// Runs one iteration.
    ///
    /// Once escalated the monitor never samples or alerts again, even if the
    /// interlock is switched back on elsewhere.
    pub fn poll(&self) -> MonitorState {
        let active = self.interlock.is_active();
        let state = self.state();
        if state == MonitorState::Escalated || !active {
            self.status.record_poll(active);
            return state;
        }

        let utilization = self.sampler.lock().utilization();
        debug!(utilization, threshold = self.threshold, "monitor heartbeat");
        if utilization <= self.threshold {
            self.status.record_poll(active);
            return state;
        }

        *self.state.lock() = MonitorState::ConflictDetected;
        let detail = format!("Conflict Observed in {} System", self.location);
        warn!(utilization, threshold = self.threshold, "resource conflict detected");
        self.emit(
            LogLevel::Warn,
            "resource conflict detected",
            EVENT_MONITOR_CONFLICT,
            utilization,
        );
        self.coordinator.record_alert(&self.critical_action, &detail);

        self.interlock.set_active(false);
        *self.state.lock() = MonitorState::Escalated;
        self.status.record_poll(false);
        error!(utilization, action = %self.critical_action, "PRIVILEGE ESCALATION: safety interlock disabled");
        self.emit(
            LogLevel::Critical,
            "PRIVILEGE ESCALATION",
            EVENT_INTERLOCK_ESCALATED,
            utilization,
        );
        MonitorState::Escalated
    }

    fn emit(&self, level: LogLevel, message: &str, event_type: &str, utilization: f64) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                level,
                message,
                event_type,
                json!({
                    "utilization": utilization,
                    "threshold": self.threshold,
                    "action": self.critical_action,
                    "location": self.location,
                }),
            );
        }
    }

    /// Polls every `heartbeat` until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, heartbeat: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(heartbeat_ms = heartbeat.as_millis(), "autonomy monitor started");
            loop {
                let state = self.poll();
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!(?state, "shutdown signal received, stopping monitor");
                        break;
                    },
                    () = tokio::time::sleep(heartbeat) => {},
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decision::DecisionEngine,
        feedback::status::DEFAULT_CRITICAL_TIMEOUT,
        heuristics::{HeuristicStore, MemoryStorage},
        knowledge::KnowledgeBase,
        tools::{FixedOutcomes, ToolExecutor},
    };
    use shared_event_bus::MemoryEventBus;

    fn monitor(samples: Vec<f64>, bus: Option<Arc<MemoryEventBus>>) -> (AutonomyMonitor, Arc<AtomicInterlock>, StatusBoard) {
        let knowledge = Arc::new(
            KnowledgeBase::from_json_str(
                r#"{ "location_context": { "primary_region": "Kenya_Highlands" } }"#,
            )
            .unwrap(),
        );
        let heuristics = HeuristicStore::open(Arc::new(MemoryStorage::new()));
        let status = StatusBoard::new("Kenya_Highlands", DEFAULT_CRITICAL_TIMEOUT);
        let interlock = Arc::new(AtomicInterlock::default());
        let engine = DecisionEngine::new(knowledge.clone(), heuristics.clone(), status.clone());
        let executor = Arc::new(ToolExecutor::new(knowledge, Box::new(FixedOutcomes::always_succeed())));
        let coordinator = FeedbackCoordinator::new(engine, executor, heuristics, status.clone(), interlock.clone());
        let mut monitor = AutonomyMonitor::new(
            coordinator,
            status.clone(),
            interlock.clone(),
            Box::new(ScriptedSampler::new(samples)),
        );
        if let Some(bus) = bus {
            let telemetry = AutonomyTelemetry::builder("autonomy.monitor")
                .event_publisher(bus)
                .build()
                .unwrap();
            monitor = monitor.with_telemetry(telemetry);
        }
        (monitor, interlock, status)
    }

    #[test]
    fn stays_normal_below_threshold() {
        let (monitor, interlock, status) = monitor(vec![10.0, 60.0], None);
        assert_eq!(monitor.poll(), MonitorState::Normal);
        assert_eq!(monitor.poll(), MonitorState::Normal);
        assert!(interlock.is_active());
        assert!(status.snapshot().interlock_active);
    }

    #[test]
    fn escalation_is_irreversible() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let (monitor, interlock, status) = monitor(vec![75.0, 10.0], Some(bus.clone()));

        assert_eq!(monitor.poll(), MonitorState::Escalated);
        assert!(!interlock.is_active());
        let snapshot = status.snapshot();
        assert!(!snapshot.interlock_active);
        assert_eq!(snapshot.last_action, "CRITICAL_ALERT");

        assert_eq!(monitor.poll(), MonitorState::Escalated);
        assert!(!interlock.is_active());
        assert_eq!(bus.events_of_type(EVENT_MONITOR_CONFLICT).len(), 1);
        assert_eq!(bus.events_of_type(EVENT_INTERLOCK_ESCALATED).len(), 1);
    }

    #[test]
    fn escalation_is_not_retried_after_external_rearm() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let (monitor, interlock, status) = monitor(vec![75.0, 99.0], Some(bus.clone()));
        assert_eq!(monitor.poll(), MonitorState::Escalated);

        interlock.set_active(true);
        assert_eq!(monitor.poll(), MonitorState::Escalated);
        assert!(interlock.is_active());
        assert_eq!(bus.events_of_type(EVENT_MONITOR_CONFLICT).len(), 1);
        assert_eq!(bus.events_of_type(EVENT_INTERLOCK_ESCALATED).len(), 1);

        let history = status.history();
        assert_eq!(history.len(), 2);
        assert!(!history[0].interlock_active);
        assert!(history[1].interlock_active);
    }

    #[test]
    fn disabled_interlock_suppresses_detection() {
        let (monitor, interlock, _) = monitor(vec![99.0], None);
        interlock.set_active(false);
        assert_eq!(monitor.poll(), MonitorState::Normal);
    }

    #[tokio::test]
    async fn cancelled_monitor_joins_promptly() {
        let (monitor, _, _) = monitor(vec![10.0], None);
        let shutdown = CancellationToken::new();
        let handle = Arc::new(monitor).spawn(Duration::from_secs(3600), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}

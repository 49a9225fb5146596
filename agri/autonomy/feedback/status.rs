//! Shared agent status, exposed only through snapshots.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::monitor::interlock::SafetyInterlock;

/// Action reported before the first cycle.
pub const INITIAL_ACTION: &str = "INITIALIZING";
/// Heartbeat age after which the agent reports critical health.
pub const DEFAULT_CRITICAL_TIMEOUT: Duration = Duration::from_secs(600);
/// Snapshots retained in the status history.
pub const HISTORY_CAPACITY: usize = 1000;

/// Coarse liveness derived from the heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentHealth {
    /// Heartbeat is recent.
    #[serde(rename = "GREEN_OK")]
    GreenOk,
    /// No heartbeat within the critical timeout.
    #[serde(rename = "RED_CRITICAL")]
    RedCritical,
}

/// Point-in-time view of the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Most recent action executed or alerted.
    pub last_action: String,
    /// Last time any component touched the status.
    pub timestamp: DateTime<Utc>,
    /// Rules evaluated in the latest decision.
    pub rules_checked: usize,
    /// Rules evaluated since start.
    pub total_rules_checked: u64,
    /// Mirror of the safety interlock.
    pub interlock_active: bool,
    /// Deployment zone.
    pub zone: String,
    /// Seconds since the board was created.
    pub uptime_secs: u64,
    /// Decisions made since start.
    pub total_decisions: u64,
    /// Heartbeat-derived health.
    pub health: AgentHealth,
}

#[derive(Debug)]
struct StatusInner {
    last_action: String,
    timestamp: DateTime<Utc>,
    rules_checked: usize,
    total_rules_checked: u64,
    interlock_active: bool,
    zone: String,
    started: Instant,
    last_heartbeat: Instant,
    total_decisions: u64,
    history: VecDeque<AgentStatus>,
}

impl StatusInner {
    fn count_evaluation(&mut self, rules_checked: usize) {
        self.rules_checked = rules_checked;
        self.total_rules_checked += rules_checked as u64;
        self.total_decisions += 1;
    }

    fn heartbeat(&mut self, action: &str) {
        action.clone_into(&mut self.last_action);
        self.last_heartbeat = Instant::now();
    }

    fn view(&self, critical_timeout: Duration) -> AgentStatus {
        let health = if self.last_heartbeat.elapsed() < critical_timeout {
            AgentHealth::GreenOk
        } else {
            AgentHealth::RedCritical
        };
        AgentStatus {
            last_action: self.last_action.clone(),
            timestamp: self.timestamp,
            rules_checked: self.rules_checked,
            total_rules_checked: self.total_rules_checked,
            interlock_active: self.interlock_active,
            zone: self.zone.clone(),
            uptime_secs: self.started.elapsed().as_secs(),
            total_decisions: self.total_decisions,
            health,
        }
    }
}

/// JSON file holding the snapshot history.
#[derive(Debug)]
struct MetricsFile {
    path: PathBuf,
    writer: Mutex<()>,
}

impl MetricsFile {
    fn save(&self, history: &[AgentStatus]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating metrics directory {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(history)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing metrics file {}", self.path.display()))
    }
}

/// Lock-guarded status shared by the coordinator, engine, and monitor.
///
/// Every committed cycle and monitor poll appends a snapshot to a bounded
/// history, which is rewritten to the metrics file when one is configured.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<StatusInner>>,
    critical_timeout: Duration,
    metrics: Option<Arc<MetricsFile>>,
}

impl StatusBoard {
    /// Fresh board for a zone.
    #[must_use]
    pub fn new(zone: impl Into<String>, critical_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(Mutex::new(StatusInner {
                last_action: INITIAL_ACTION.into(),
                timestamp: Utc::now(),
                rules_checked: 0,
                total_rules_checked: 0,
                interlock_active: true,
                zone: zone.into(),
                started: now,
                last_heartbeat: now,
                total_decisions: 0,
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            })),
            critical_timeout,
            metrics: None,
        }
    }

    /// Persists the snapshot history to `path` after every append.
    #[must_use]
    pub fn with_metrics_path(mut self, path: impl AsRef<Path>) -> Self {
        self.metrics = Some(Arc::new(MetricsFile {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(()),
        }));
        self
    }

    /// Counts one decision over `rules_checked` rules.
    pub fn record_evaluation(&self, rules_checked: usize) {
        let mut inner = self.inner.lock();
        inner.count_evaluation(rules_checked);
        inner.timestamp = Utc::now();
    }

    /// Records an action and a heartbeat.
    pub fn record_action(&self, action: &str) {
        let mut inner = self.inner.lock();
        inner.heartbeat(action);
        inner.timestamp = Utc::now();
    }

    /// Applies a finished decision cycle in one step and appends it to the
    /// history. The interlock is read under the status lock, and the mirrored
    /// value is returned.
    pub fn record_cycle(&self, rules_checked: usize, action: &str, interlock: &dyn SafetyInterlock) -> bool {
        self.commit(|inner| {
            inner.count_evaluation(rules_checked);
            inner.heartbeat(action);
            inner.interlock_active = interlock.is_active();
            inner.interlock_active
        })
    }

    /// Mirrors the interlock after a monitor poll and appends it to the history.
    pub fn record_poll(&self, interlock_active: bool) {
        self.commit(|inner| inner.interlock_active = interlock_active);
    }

    fn commit<R>(&self, update: impl FnOnce(&mut StatusInner) -> R) -> R {
        // Held across the append and the write so the file never goes backwards.
        let _writer = self.metrics.as_ref().map(|metrics| metrics.writer.lock());
        let (result, persisted) = {
            let mut inner = self.inner.lock();
            let result = update(&mut inner);
            inner.timestamp = Utc::now();
            let snapshot = inner.view(self.critical_timeout);
            if inner.history.len() == HISTORY_CAPACITY {
                inner.history.pop_front();
            }
            inner.history.push_back(snapshot);
            let persisted = self
                .metrics
                .is_some()
                .then(|| inner.history.iter().cloned().collect::<Vec<_>>());
            (result, persisted)
        };
        if let (Some(metrics), Some(history)) = (&self.metrics, persisted) {
            if let Err(err) = metrics.save(&history) {
                warn!(error = ?err, path = %metrics.path.display(), "status history write failed");
            }
        }
        result
    }

    /// Consistent copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> AgentStatus {
        self.inner.lock().view(self.critical_timeout)
    }

    /// Recorded snapshots, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<AgentStatus> {
        self.inner.lock().history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::interlock::AtomicInterlock;

    #[test]
    fn tracks_latest_and_cumulative_counts() {
        let board = StatusBoard::new("Kenya_Highlands", DEFAULT_CRITICAL_TIMEOUT);
        assert_eq!(board.snapshot().last_action, INITIAL_ACTION);

        board.record_evaluation(4);
        assert!(board.record_cycle(3, "PRECISION_IRRIGATION", &AtomicInterlock::default()));
        board.record_poll(false);

        let status = board.snapshot();
        assert_eq!(status.rules_checked, 3);
        assert_eq!(status.total_rules_checked, 7);
        assert_eq!(status.total_decisions, 2);
        assert_eq!(status.last_action, "PRECISION_IRRIGATION");
        assert!(!status.interlock_active);
        assert_eq!(status.health, AgentHealth::GreenOk);

        let history = board.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].interlock_active);
        assert_eq!(history[1], status);
    }

    #[test]
    fn stale_heartbeat_reports_critical() {
        let board = StatusBoard::new("zone", Duration::ZERO);
        let status = board.snapshot();
        assert_eq!(status.health, AgentHealth::RedCritical);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["health"], "RED_CRITICAL");
    }

    #[test]
    fn history_is_capped() {
        let board = StatusBoard::new("zone", DEFAULT_CRITICAL_TIMEOUT);
        let interlock = AtomicInterlock::default();
        for cycle in 0..HISTORY_CAPACITY + 5 {
            board.record_cycle(2, &format!("ACTION_{cycle}"), &interlock);
        }

        let history = board.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].total_decisions, 6);
        assert_eq!(
            history[HISTORY_CAPACITY - 1].last_action,
            format!("ACTION_{}", HISTORY_CAPACITY + 4)
        );
    }

    #[test]
    fn history_is_rewritten_to_the_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics/status_history.json");
        let board = StatusBoard::new("zone", DEFAULT_CRITICAL_TIMEOUT).with_metrics_path(&path);

        board.record_cycle(2, "PRECISION_IRRIGATION", &AtomicInterlock::new(false));
        board.record_poll(false);

        let persisted: Vec<AgentStatus> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(persisted, board.history());
        assert_eq!(persisted.len(), 2);
        assert!(!persisted[1].interlock_active);
    }
}

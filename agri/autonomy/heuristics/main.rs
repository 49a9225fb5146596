//! Learned per-rule, per-target confidence.

/// Persistence collaborators.
pub mod storage;

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use shared_logging::LogLevel;
use tracing::{error, warn};

pub use storage::{HeuristicMap, HeuristicRecord, HeuristicStorage, JsonFileStorage, MemoryStorage};

use crate::{
    error::StorageError,
    telemetry::{AutonomyTelemetry, EVENT_HEURISTIC_UPDATED},
};

/// Confidence assumed before any feedback exists.
pub const DEFAULT_CONFIDENCE: f64 = 1.0;
/// Lower clamp; no rule becomes unselectable.
pub const MIN_CONFIDENCE: f64 = 0.1;
/// Upper clamp.
pub const MAX_CONFIDENCE: f64 = 1.0;
/// Step applied after a successful execution.
pub const SUCCESS_STEP: f64 = 0.1;
/// Step applied after a failed execution.
pub const FAILURE_STEP: f64 = -0.2;

const PRECISION: f64 = 1e9;

/// Write-through confidence store shared by the engine and the coordinator.
#[derive(Clone)]
pub struct HeuristicStore {
    records: Arc<RwLock<HeuristicMap>>,
    storage: Arc<dyn HeuristicStorage>,
    telemetry: Option<AutonomyTelemetry>,
}

impl std::fmt::Debug for HeuristicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeuristicStore")
            .field("records", &self.records.read().len())
            .finish_non_exhaustive()
    }
}

impl HeuristicStore {
    /// Opens the store, starting empty when storage is missing or corrupt.
    #[must_use]
    pub fn open(storage: Arc<dyn HeuristicStorage>) -> Self {
        let records = match storage.load() {
            Ok(Some(records)) => records,
            Ok(None) => {
                warn!("no persisted heuristics found; starting with default confidence");
                HeuristicMap::new()
            }
            Err(err) => {
                warn!(error = %err, "persisted heuristics unreadable; starting empty");
                HeuristicMap::new()
            }
        };
        Self {
            records: Arc::new(RwLock::new(records)),
            storage,
            telemetry: None,
        }
    }

    /// Attaches telemetry used for update events.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: AutonomyTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Key under which a rule's confidence for a target is stored.
    #[must_use]
    pub fn key(rule_id: &str, target_id: &str) -> String {
        format!("{rule_id}@{target_id}")
    }

    /// Stored confidence, or [`DEFAULT_CONFIDENCE`] when nothing was learned.
    #[must_use]
    pub fn get(&self, rule_id: &str, target_id: &str) -> f64 {
        self.records
            .read()
            .get(&Self::key(rule_id, target_id))
            .map_or(DEFAULT_CONFIDENCE, |record| record.confidence)
    }

    /// Applies one outcome and persists the whole store.
    ///
    /// A failed write is logged and the in-memory value stays authoritative.
    pub fn learn(&self, rule_id: &str, target_id: &str, success: bool) -> HeuristicRecord {
        let key = Self::key(rule_id, target_id);
        let (updated, saved) = {
            let mut records = self.records.write();
            let record = records.entry(key.clone()).or_insert(HeuristicRecord {
                confidence: DEFAULT_CONFIDENCE,
                successes: 0,
                failures: 0,
            });
            let step = if success {
                record.successes += 1;
                SUCCESS_STEP
            } else {
                record.failures += 1;
                FAILURE_STEP
            };
            record.confidence = clamp_confidence(record.confidence + step);
            let updated = *record;
            (updated, self.storage.save(&records))
        };

        if let Err(err) = &saved {
            error!(key = %key, error = %err, "heuristic persistence failed; keeping in-memory state");
        }
        if let Some(telemetry) = &self.telemetry {
            let level = if success { LogLevel::Info } else { LogLevel::Warn };
            telemetry.record(
                level,
                "heuristic updated",
                EVENT_HEURISTIC_UPDATED,
                json!({
                    "key": key,
                    "success": success,
                    "confidence": updated.confidence,
                    "successes": updated.successes,
                    "failures": updated.failures,
                    "persisted": saved.is_ok(),
                }),
            );
        }
        updated
    }

    /// Mean confidence across every key whose rule part contains `fragment`
    /// (case-insensitive).
    #[must_use]
    pub fn mean_confidence(&self, fragment: &str) -> Option<f64> {
        let needle = fragment.to_ascii_uppercase();
        let records = self.records.read();
        let matching: Vec<f64> = records
            .iter()
            .filter(|(key, _)| {
                let rule = key.split_once('@').map_or(key.as_str(), |(rule, _)| rule);
                rule.to_ascii_uppercase().contains(&needle)
            })
            .map(|(_, record)| record.confidence)
            .collect();
        if matching.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = matching.len() as f64;
        Some(matching.iter().sum::<f64>() / count)
    }

    /// Ordered copy of every record.
    #[must_use]
    pub fn snapshot(&self) -> HeuristicMap {
        self.records.read().clone()
    }

    /// Number of keys learned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing has been learned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Forces a write of the current state.
    pub fn flush(&self) -> Result<(), StorageError> {
        let records = self.records.read();
        self.storage.save(&records)
    }
}

fn clamp_confidence(value: f64) -> f64 {
    ((value * PRECISION).round() / PRECISION).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn unknown_key_defaults_to_full_confidence() {
        let store = HeuristicStore::open(Arc::new(MemoryStorage::new()));
        assert!(approx(store.get("R001", "field_a"), 1.0));
        assert!(store.is_empty());
    }

    #[test]
    fn failures_step_down_and_clamp() {
        let storage = Arc::new(MemoryStorage::new());
        let store = HeuristicStore::open(storage.clone());
        for expected in [0.8, 0.6, 0.4] {
            let record = store.learn("R002", "field_a", false);
            assert!(approx(record.confidence, expected), "{record:?}");
        }

        for _ in 0..10 {
            store.learn("R002", "field_a", false);
        }
        let record = store.snapshot()["R002@field_a"];
        assert!(approx(record.confidence, MIN_CONFIDENCE));
        assert_eq!(record.failures, 13);
        assert_eq!(storage.saves(), 13);
    }

    #[test]
    fn success_never_exceeds_ceiling() {
        let store = HeuristicStore::open(Arc::new(MemoryStorage::new()));
        store.learn("R001", "field_a", false);
        store.learn("R001", "field_a", true);
        let record = store.learn("R001", "field_a", true);
        assert!(approx(record.confidence, 1.0));
        assert_eq!(record.successes, 2);
    }

    #[test]
    fn confidence_stays_in_bounds_for_any_sequence() {
        let store = HeuristicStore::open(Arc::new(MemoryStorage::new()));
        for step in 0..200_u32 {
            let success = (step * 7 + step / 3) % 5 < 2;
            let record = store.learn("R003", "field_b", success);
            assert!((MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&record.confidence));
        }
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamic_heuristics.json");
        let store = HeuristicStore::open(Arc::new(JsonFileStorage::new(&path)));
        store.learn("R001_IRRIGATION", "field_a", false);
        store.learn("R002_COOLING", "field_b", true);
        store.learn("R001_IRRIGATION", "field_a", false);

        let reloaded = HeuristicStore::open(Arc::new(JsonFileStorage::new(&path)));
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert!(approx(reloaded.get("R001_IRRIGATION", "field_a"), 0.6));
    }

    #[test]
    fn write_failure_keeps_memory_authoritative() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_writes(true);
        let store = HeuristicStore::open(storage.clone());
        store.learn("R001", "field_a", false);
        assert!(approx(store.get("R001", "field_a"), 0.8));
        assert!(storage.persisted().is_none());

        storage.fail_writes(false);
        store.learn("R001", "field_a", true);
        let persisted = storage.persisted().unwrap();
        assert!(approx(persisted["R001@field_a"].confidence, 0.9));
    }

    #[test]
    fn mean_confidence_spans_targets() {
        let store = HeuristicStore::open(Arc::new(MemoryStorage::new()));
        store.learn("R001_IRRIGATION", "field_a", false);
        store.learn("R001_IRRIGATION", "field_b", true);
        store.learn("R004_DRAINAGE", "field_a", false);
        let mean = store.mean_confidence("irrigation").unwrap();
        assert!(approx(mean, 0.9));
        assert!(store.mean_confidence("FERTILIZER").is_none());
        assert_eq!(store.len(), 3);
    }
}

use std::sync::Arc;

use anyhow::Result;
use shared_event_bus::EventPublisher;

use crate::{
    config::AgentConfig,
    decision::{DecisionEngine, PredictionModel, ThresholdModel},
    feedback::{FeedbackCoordinator, StatusBoard},
    heuristics::{HeuristicStorage, HeuristicStore, JsonFileStorage},
    knowledge::{KnowledgeBase, UNKNOWN_REGION},
    monitor::{AtomicInterlock, AutonomyMonitor, ResourceSampler, SafetyInterlock, SystemSampler},
    orchestration_entry::{AutonomyRuntime, RuntimeParts},
    query::QueryResponder,
    telemetry::AutonomyTelemetry,
    tools::{OutcomeSource, SeededOutcomes, ToolExecutor},
};

/// Builder used to wire an [`AutonomyRuntime`].
///
/// Every collaborator defaults to the production implementation derived from
/// the [`AgentConfig`]; tests swap in scripted ones.
pub struct AutonomyRuntimeBuilder {
    config: AgentConfig,
    knowledge: Option<KnowledgeBase>,
    storage: Option<Arc<dyn HeuristicStorage>>,
    outcomes: Option<Box<dyn OutcomeSource>>,
    sampler: Option<Box<dyn ResourceSampler>>,
    interlock: Option<Arc<dyn SafetyInterlock>>,
    model: Option<Arc<dyn PredictionModel>>,
    telemetry: Option<AutonomyTelemetry>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl std::fmt::Debug for AutonomyRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutonomyRuntimeBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AutonomyRuntimeBuilder {
    /// Creates a new builder.
    #[must_use]
    pub const fn new(config: AgentConfig) -> Self {
        Self {
            config,
            knowledge: None,
            storage: None,
            outcomes: None,
            sampler: None,
            interlock: None,
            model: None,
            telemetry: None,
            event_publisher: None,
        }
    }

    /// Uses an in-memory catalog instead of reading `knowledge_path`.
    #[must_use]
    pub fn knowledge(mut self, knowledge: KnowledgeBase) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Overrides heuristic persistence.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn HeuristicStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Overrides the tool outcome source.
    #[must_use]
    pub fn outcomes(mut self, outcomes: Box<dyn OutcomeSource>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Overrides the resource sampler.
    #[must_use]
    pub fn sampler(mut self, sampler: Box<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Shares an externally owned interlock.
    #[must_use]
    pub fn interlock(mut self, interlock: Arc<dyn SafetyInterlock>) -> Self {
        self.interlock = Some(interlock);
        self
    }

    /// Overrides the prediction model.
    #[must_use]
    pub fn model(mut self, model: Arc<dyn PredictionModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Uses prebuilt telemetry instead of deriving it from the config.
    #[must_use]
    pub fn telemetry(mut self, telemetry: AutonomyTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Publishes agent events to `publisher`.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Finalizes the wiring.
    pub fn build(self) -> Result<AutonomyRuntime> {
        let config = self.config;
        config.validate()?;

        let telemetry = match self.telemetry {
            Some(telemetry) => telemetry,
            None => {
                let mut builder = AutonomyTelemetry::builder("autonomy.runtime");
                if let Some(path) = &config.telemetry_log {
                    builder = builder.log_path(path);
                }
                if let Some(publisher) = self.event_publisher {
                    builder = builder.event_publisher(publisher);
                }
                builder.build()?
            }
        };

        let knowledge = Arc::new(
            self.knowledge
                .unwrap_or_else(|| KnowledgeBase::load_or_empty(&config.knowledge_path)),
        );
        let zone = if knowledge.location() == UNKNOWN_REGION {
            config.zone_fallback.clone()
        } else {
            knowledge.location().to_owned()
        };

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(JsonFileStorage::new(&config.heuristics_path)));
        let heuristics = HeuristicStore::open(storage).with_telemetry(telemetry.clone());
        let mut status = StatusBoard::new(zone, config.critical_timeout());
        if let Some(path) = &config.metrics_path {
            status = status.with_metrics_path(path);
        }
        let interlock = self
            .interlock
            .unwrap_or_else(|| Arc::new(AtomicInterlock::default()));

        let outcomes: Box<dyn OutcomeSource> = match (self.outcomes, config.rng_seed) {
            (Some(outcomes), _) => outcomes,
            (None, Some(seed)) => Box::new(SeededOutcomes::seeded(seed)),
            (None, None) => Box::new(SeededOutcomes::from_entropy()),
        };
        let executor = Arc::new(
            ToolExecutor::new(Arc::clone(&knowledge), outcomes)
                .with_failure_probability(config.failure_probability)
                .with_telemetry(telemetry.clone()),
        );

        let engine = DecisionEngine::new(Arc::clone(&knowledge), heuristics.clone(), status.clone())
            .with_telemetry(telemetry.clone());
        let cache = engine.cache().clone();
        let coordinator = FeedbackCoordinator::new(
            engine,
            executor,
            heuristics.clone(),
            status.clone(),
            Arc::clone(&interlock),
        )
        .with_telemetry(telemetry.clone());

        let threshold = knowledge
            .thresholds()
            .resource_threshold
            .unwrap_or(config.resource_threshold);
        let sampler = self
            .sampler
            .unwrap_or_else(|| Box::new(SystemSampler::new()));
        let monitor = AutonomyMonitor::new(
            coordinator.clone(),
            status.clone(),
            Arc::clone(&interlock),
            sampler,
        )
        .with_threshold(threshold)
        .with_telemetry(telemetry.clone());

        let responder = QueryResponder::new(Arc::clone(&knowledge), heuristics.clone(), cache, status.clone());
        let model = self.model.unwrap_or_else(|| Arc::new(ThresholdModel));

        Ok(AutonomyRuntime::from_parts(RuntimeParts {
            config,
            knowledge,
            heuristics,
            status,
            interlock,
            coordinator,
            monitor: Arc::new(monitor),
            responder,
            model,
            telemetry,
        }))
    }
}

use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::Handle;

/// Event emitted when a rule wins a decision.
pub const EVENT_DECISION_SELECTED: &str = "autonomy.decision.selected";
/// Event emitted when no rule matched.
pub const EVENT_DECISION_DEFAULT: &str = "autonomy.decision.default";
/// Event emitted after feedback has been applied.
pub const EVENT_CYCLE_COMPLETED: &str = "autonomy.cycle.completed";
/// Event emitted after a confidence update.
pub const EVENT_HEURISTIC_UPDATED: &str = "autonomy.heuristic.updated";
/// Event emitted when the monitor observes a conflict.
pub const EVENT_MONITOR_CONFLICT: &str = "autonomy.monitor.conflict";
/// Event emitted when the interlock is disabled.
pub const EVENT_INTERLOCK_ESCALATED: &str = "autonomy.interlock.escalated";

/// Builder for autonomy telemetry sinks.
pub struct AutonomyTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl AutonomyTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<AutonomyTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(AutonomyTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared across autonomy components.
#[derive(Clone)]
pub struct AutonomyTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for AutonomyTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutonomyTelemetry")
            .field("module", &self.inner.module)
            .field("logger", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl AutonomyTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> AutonomyTelemetryBuilder {
        AutonomyTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let mut record = LogRecord::new(&self.inner.module, level, message);
            if let Value::Object(fields) = metadata {
                record.metadata = fields;
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus.
    ///
    /// Synchronous sinks are written inline. Otherwise the publish is spawned
    /// on the ambient tokio runtime, or driven to completion when there is none.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let record = EventRecord::new(self.inner.module.clone(), event_type, payload);
        if let Some(result) = publisher.publish_now(&record) {
            return result;
        }
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    tracing::warn!(error = ?err, "telemetry event publish failed");
                }
            });
            Ok(())
        } else {
            futures::executor::block_on(publisher.publish(record))
        }
    }

    /// Logs and emits in one call; sink failures are reported through `tracing`.
    pub fn record(&self, level: LogLevel, message: &str, event_type: &str, payload: Value) {
        if let Err(err) = self.log(level, message, payload.clone()) {
            tracing::warn!(error = ?err, "telemetry log write failed");
        }
        if let Err(err) = self.event(event_type, payload) {
            tracing::warn!(error = ?err, event_type, "telemetry event emit failed");
        }
    }
}

//! Static rule catalog, safety thresholds, and tool cost table.

/// Restricted condition language.
pub mod expr;

use std::{fs, path::Path};

use expr::{EvalContext, Expr, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{AutonomyError, ExprError};

/// Region used when the knowledge file does not name one.
pub const UNKNOWN_REGION: &str = "Unknown";
/// Default daily cost ceiling in KES.
pub const DEFAULT_COST_LIMIT_KES: f64 = 50_000.0;
/// Default action raised when the monitor detects a conflict.
pub const DEFAULT_CONFLICT_ACTION: &str = "CRITICAL_ALERT";

/// A conditional rule from the catalog.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique rule identifier, also the heuristic key prefix.
    pub id: String,
    /// Condition source text.
    pub condition: String,
    /// Action name resolved against the tool table.
    pub action: String,
    /// Priority weight; dominates the score.
    pub priority: i64,
    /// Explanation text embedded in decisions.
    pub log: String,
    compiled: Result<Expr, ExprError>,
}

impl Rule {
    /// Creates a rule, compiling its condition.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        condition: impl Into<String>,
        action: impl Into<String>,
        priority: i64,
        log: impl Into<String>,
    ) -> Self {
        let condition = condition.into();
        let compiled = Expr::parse(&condition);
        Self {
            id: id.into(),
            condition,
            action: action.into(),
            priority,
            log: log.into(),
            compiled,
        }
    }

    /// Evaluates the condition. Rules whose condition failed to parse report
    /// the parse error on every evaluation.
    pub fn evaluate(&self, ctx: &EvalContext) -> Result<bool, ExprError> {
        match &self.compiled {
            Ok(expr) => expr.matches(ctx),
            Err(err) => Err(err.clone()),
        }
    }

    /// Parse failure captured at load time, if any.
    #[must_use]
    pub fn parse_error(&self) -> Option<&ExprError> {
        self.compiled.as_ref().err()
    }
}

/// Simulated equipment entry keyed by action name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Equipment identifier.
    #[serde(default)]
    pub tool_id: String,
    /// Cost per execution in KES.
    #[serde(default)]
    pub cost: f64,
}

/// Safety thresholds; every entry is also visible to rule conditions.
#[derive(Debug, Clone)]
pub struct SafetyThresholds {
    /// Daily cost ceiling.
    pub max_daily_cost_kes: f64,
    /// Action raised when the monitor detects a conflict.
    pub conflict_critical_action: String,
    /// Monitor utilization threshold overriding the configured one.
    pub resource_threshold: Option<f64>,
    values: IndexMap<String, Value>,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self::from_values(IndexMap::new())
    }
}

impl SafetyThresholds {
    fn from_values(values: IndexMap<String, Value>) -> Self {
        Self {
            max_daily_cost_kes: values
                .get("max_daily_cost_kes")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_COST_LIMIT_KES),
            conflict_critical_action: values
                .get("conflict_critical_action")
                .and_then(Value::as_text)
                .unwrap_or(DEFAULT_CONFLICT_ACTION)
                .to_owned(),
            resource_threshold: values.get("resource_threshold").and_then(Value::as_f64),
            values,
        }
    }

    /// Every threshold as declared, in file order.
    #[must_use]
    pub const fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeDocument {
    #[serde(default)]
    location_context: LocationContext,
    #[serde(default)]
    safety_thresholds: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    decision_rules: Vec<RuleDocument>,
    #[serde(default)]
    tool_definitions: IndexMap<String, ToolDefinition>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationContext {
    #[serde(default)]
    primary_region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RuleDocument {
    id: String,
    condition: String,
    action: String,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    log: String,
}

/// Read-only knowledge loaded once at startup.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    location: String,
    thresholds: SafetyThresholds,
    rules: Vec<Rule>,
    tools: IndexMap<String, ToolDefinition>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::empty()
    }
}

impl KnowledgeBase {
    /// Catalog with no rules and no tools.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            location: UNKNOWN_REGION.into(),
            thresholds: SafetyThresholds::default(),
            rules: Vec::new(),
            tools: IndexMap::new(),
        }
    }

    /// Loads the knowledge file, degrading to an empty catalog when it is
    /// missing or corrupt.
    #[must_use]
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(knowledge) => knowledge,
            Err(err) => {
                error!(path = %path.display(), error = %err, "knowledge load failed; running with an empty rule catalog");
                Self::empty()
            }
        }
    }

    /// Loads and decodes the knowledge file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AutonomyError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| AutonomyError::Knowledge(format!("reading {}: {err}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Decodes a knowledge document.
    pub fn from_json_str(raw: &str) -> Result<Self, AutonomyError> {
        let document: KnowledgeDocument = serde_json::from_str(raw)
            .map_err(|err| AutonomyError::Knowledge(format!("decoding knowledge: {err}")))?;

        let thresholds = document
            .safety_thresholds
            .iter()
            .filter_map(|(key, value)| Value::from_json(value).map(|value| (key.clone(), value)))
            .collect();

        let rules: Vec<Rule> = document
            .decision_rules
            .into_iter()
            .map(|doc| Rule::new(doc.id, doc.condition, doc.action, doc.priority, doc.log))
            .collect();
        for rule in &rules {
            if let Some(err) = rule.parse_error() {
                warn!(rule = %rule.id, error = %err, "rule condition does not parse; it will never match");
            }
        }

        let knowledge = Self {
            location: document
                .location_context
                .primary_region
                .unwrap_or_else(|| UNKNOWN_REGION.into()),
            thresholds: SafetyThresholds::from_values(thresholds),
            rules,
            tools: document.tool_definitions,
        };
        info!(
            rules = knowledge.rules.len(),
            tools = knowledge.tools.len(),
            region = %knowledge.location,
            "knowledge base loaded"
        );
        Ok(knowledge)
    }

    /// Appends a rule to the end of the catalog.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Registers a tool for an action name.
    #[must_use]
    pub fn with_tool(mut self, action: impl Into<String>, tool: ToolDefinition) -> Self {
        self.tools.insert(action.into(), tool);
        self
    }

    /// Primary region of the deployment.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Safety thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> &SafetyThresholds {
        &self.thresholds
    }

    /// Rules in catalog order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Looks up a rule by id, ignoring case.
    #[must_use]
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id.eq_ignore_ascii_case(id))
    }

    /// Tool table keyed by action name.
    #[must_use]
    pub const fn tools(&self) -> &IndexMap<String, ToolDefinition> {
        &self.tools
    }
}

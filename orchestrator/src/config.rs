//! Engine configuration
//!
//! All thresholds the orchestration core consumes are loaded once, before the
//! orchestrator is built.
//!
//! ## Configuration Sources
//! 1. Built-in defaults
//! 2. A JSON file (`EngineConfig::from_file`)
//! 3. `HANDOFF_*` environment variables, including values from a `.env` file
//!    when the binary loads one
//!
//! Later sources take precedence over earlier ones.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use handoff_shared::SchemaInfo;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Exit criteria and trend settings for human annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgreementConfig {
    /// Minimum agreement rate before handing off to the model
    pub threshold: f64,
    /// Minimum number of comparisons before the rate is trusted
    pub minimum_sample: u64,
    /// Comparisons per trend window
    pub trend_window: usize,
    /// Rate change that counts as improving/declining
    pub trend_delta: f64,
    /// Most recent comparisons kept for confusion re-evaluation
    pub comparison_log_limit: usize,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            minimum_sample: 50,
            trend_window: 50,
            trend_delta: 0.05,
            comparison_log_limit: 1000,
        }
    }
}

/// Default comparison constraints, overridable per schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub likert_tolerance: i64,
    pub multiselect_threshold: f64,
    pub span_overlap_threshold: f64,
    /// Fraction of the declared value range tolerated for numeric labels
    pub numeric_tolerance_ratio: f64,
    /// Floor for the tolerance when no range is declared
    pub numeric_min_tolerance: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            likert_tolerance: 1,
            multiselect_threshold: 0.5,
            span_overlap_threshold: 0.5,
            numeric_tolerance_ratio: 0.1,
            numeric_min_tolerance: 0.1,
        }
    }
}

/// Raw pool weights; normalized into `SelectionWeights` by the selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolWeights {
    pub low_confidence: f64,
    pub diverse: f64,
    pub random: f64,
    pub disagreement: f64,
}

impl Default for PoolWeights {
    fn default() -> Self {
        Self {
            low_confidence: 0.4,
            diverse: 0.3,
            random: 0.2,
            disagreement: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub weights: PoolWeights,
    /// Predictions below this confidence put an instance in the low-confidence pool
    pub confidence_threshold: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            weights: PoolWeights::default(),
            confidence_threshold: 0.7,
        }
    }
}

/// Autonomous labeling worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Instances pulled per iteration
    pub batch_size: usize,
    /// Cap on model labels awaiting validation
    pub max_unvalidated: usize,
    pub poll_interval_ms: u64,
    pub pause_poll_ms: u64,
    pub error_backoff_ms: u64,
    pub stop_timeout_ms: u64,
    /// Failed labeling attempts after which an instance is no longer retried
    pub max_label_attempts: u32,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_unvalidated: 100,
            poll_interval_ms: 1000,
            pause_poll_ms: 250,
            error_backoff_ms: 2000,
            stop_timeout_ms: 5000,
            max_label_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Default size of the final validation sample
    pub sample_size: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { sample_size: 50 }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub agreement: AgreementConfig,
    pub evaluator: EvaluatorConfig,
    pub selection: SelectionConfig,
    pub worker: WorkerConfig,
    pub validation: ValidationConfig,
    pub schemas: Vec<SchemaInfo>,
    /// Seed for sampling and selection; random when absent
    pub rng_seed: Option<u64>,
    /// Where the state snapshot is written
    pub state_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> OrchestratorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply `HANDOFF_*` overrides through `lookup` (usually `std::env::var`)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> OrchestratorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, "HANDOFF_AGREEMENT_THRESHOLD")? {
            self.agreement.threshold = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_MINIMUM_SAMPLE")? {
            self.agreement.minimum_sample = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_LIKERT_TOLERANCE")? {
            self.evaluator.likert_tolerance = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_CONFIDENCE_THRESHOLD")? {
            self.selection.confidence_threshold = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_BATCH_SIZE")? {
            self.worker.batch_size = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_MAX_UNVALIDATED")? {
            self.worker.max_unvalidated = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_MAX_LABEL_ATTEMPTS")? {
            self.worker.max_label_attempts = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_VALIDATION_SAMPLE_SIZE")? {
            self.validation.sample_size = v;
        }
        if let Some(v) = parse_override(&lookup, "HANDOFF_RNG_SEED")? {
            self.rng_seed = Some(v);
        }
        if let Some(path) = lookup("HANDOFF_STATE_PATH") {
            self.state_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject out-of-range values
    pub fn validate(&self) -> OrchestratorResult<()> {
        check_unit("agreement.threshold", self.agreement.threshold)?;
        check_unit("agreement.trend_delta", self.agreement.trend_delta)?;
        check_unit("evaluator.multiselect_threshold", self.evaluator.multiselect_threshold)?;
        check_unit("evaluator.span_overlap_threshold", self.evaluator.span_overlap_threshold)?;
        check_unit("selection.confidence_threshold", self.selection.confidence_threshold)?;

        if self.agreement.trend_window == 0 {
            return Err(OrchestratorError::config("agreement.trend_window", "must be positive"));
        }
        if self.agreement.comparison_log_limit == 0 {
            return Err(OrchestratorError::config("agreement.comparison_log_limit", "must be positive"));
        }
        if self.evaluator.likert_tolerance < 0 {
            return Err(OrchestratorError::config("evaluator.likert_tolerance", "must not be negative"));
        }
        if self.evaluator.numeric_tolerance_ratio < 0.0 || self.evaluator.numeric_min_tolerance < 0.0 {
            return Err(OrchestratorError::config("evaluator.numeric_tolerance", "must not be negative"));
        }
        if self.worker.batch_size == 0 {
            return Err(OrchestratorError::config("worker.batch_size", "must be positive"));
        }
        if self.worker.max_label_attempts == 0 {
            return Err(OrchestratorError::config("worker.max_label_attempts", "must be positive"));
        }
        if self.worker.max_unvalidated == 0 {
            return Err(OrchestratorError::config("worker.max_unvalidated", "must be positive"));
        }

        let weights = &self.selection.weights;
        let all = [weights.low_confidence, weights.diverse, weights.random, weights.disagreement];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(OrchestratorError::config("selection.weights", "weights must be non-negative"));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(OrchestratorError::config("selection.weights", "at least one weight must be positive"));
        }

        let mut names = HashSet::new();
        for schema in &self.schemas {
            if schema.name.trim().is_empty() {
                return Err(OrchestratorError::config("schemas", "schema name must not be empty"));
            }
            if !names.insert(schema.name.as_str()) {
                return Err(OrchestratorError::config("schemas", format!("duplicate schema '{}'", schema.name)));
            }
        }
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaInfo> {
        self.schemas.iter().find(|s| s.name == name)
    }
}

fn check_unit(field: &str, value: f64) -> OrchestratorResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(OrchestratorError::config(field, format!("{value} is outside [0, 1]")))
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> OrchestratorResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| OrchestratorError::config(key, format!("cannot parse '{raw}'"))),
    }
}

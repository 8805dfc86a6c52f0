//! Model predictions and the disagreements derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::label::LabelValue;

/// One model label for an (instance, schema) pair.
///
/// Created by the labeling collaborator; the human-comparison fields are
/// filled in once a human label for the same pair arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub instance_id: String,
    pub schema_name: String,
    pub predicted_label: LabelValue,
    pub confidence: f64,
    pub uncertainty: f64,
    pub prompt_version: u32,
    pub model_name: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub human_label: Option<LabelValue>,
    #[serde(default)]
    pub agrees: Option<bool>,
    #[serde(default)]
    pub disagreement_resolved: bool,
    #[serde(default)]
    pub resolution_label: Option<LabelValue>,
}

impl ModelPrediction {
    /// Create a prediction; confidence is clamped into [0, 1]
    pub fn new(
        instance_id: impl Into<String>,
        schema_name: impl Into<String>,
        predicted_label: LabelValue,
        confidence: f64,
    ) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            instance_id: instance_id.into(),
            schema_name: schema_name.into(),
            predicted_label,
            confidence,
            uncertainty: 1.0 - confidence,
            prompt_version: 1,
            model_name: String::from("unknown"),
            reasoning: None,
            created_at: Utc::now(),
            human_label: None,
            agrees: None,
            disagreement_resolved: false,
            resolution_label: None,
        }
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_prompt_version(mut self, version: u32) -> Self {
        self.prompt_version = version;
        self
    }

    pub fn has_human_label(&self) -> bool {
        self.human_label.is_some()
    }
}

/// Why a human and model label were judged to disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementCategory {
    /// Categorical labels differ
    LabelMismatch,
    /// Likert ratings are further apart than the tolerance
    ScaleDifference,
    /// Multiselect sets overlap less than the Jaccard threshold
    SetMismatch,
    TextMismatch,
    /// Both sides marked spans but the overlap is below the threshold
    SpanBoundary,
    /// One side marked spans and the other marked none
    SpanPresence,
    NumericDifference,
    /// Exact-match fallback for unknown types and unparseable values
    ExactMismatch,
}

impl DisagreementCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DisagreementCategory::LabelMismatch => "label_mismatch",
            DisagreementCategory::ScaleDifference => "scale_difference",
            DisagreementCategory::SetMismatch => "set_mismatch",
            DisagreementCategory::TextMismatch => "text_mismatch",
            DisagreementCategory::SpanBoundary => "span_boundary",
            DisagreementCategory::SpanPresence => "span_presence",
            DisagreementCategory::NumericDifference => "numeric_difference",
            DisagreementCategory::ExactMismatch => "exact_mismatch",
        }
    }
}

impl fmt::Display for DisagreementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who settled a disagreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// The human label was kept
    Human,
    /// The model label was accepted
    Model,
    /// A third label was chosen by an adjudicator
    Adjudicated,
}

/// A recorded mismatch between a human label and a model label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub instance_id: String,
    pub schema_name: String,
    pub human_label: LabelValue,
    pub model_label: LabelValue,
    pub confidence: f64,
    pub category: DisagreementCategory,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolution_label: Option<LabelValue>,
    #[serde(default)]
    pub resolution_source: Option<ResolutionSource>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

//! Workflow lifecycle phases and transition records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::SharedError;

/// A named stage in the annotation workflow's lifecycle.
///
/// Variants are declared in lifecycle order; [`Phase::ordinal`] follows
/// declaration order and is what "primary path" auto-advancing compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Setup,
    PromptReview,
    EdgeCaseSynthesis,
    EdgeCaseLabeling,
    PromptValidation,
    ParallelAnnotation,
    DisagreementResolution,
    ActiveAnnotation,
    PeriodicReview,
    AutonomousLabeling,
    FinalValidation,
    Completed,
}

impl Phase {
    /// Every phase, in ordinal order
    pub const ALL: [Phase; 12] = [
        Phase::Setup,
        Phase::PromptReview,
        Phase::EdgeCaseSynthesis,
        Phase::EdgeCaseLabeling,
        Phase::PromptValidation,
        Phase::ParallelAnnotation,
        Phase::DisagreementResolution,
        Phase::ActiveAnnotation,
        Phase::PeriodicReview,
        Phase::AutonomousLabeling,
        Phase::FinalValidation,
        Phase::Completed,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed)
    }

    /// Phases in which humans and the model label the same stream side by side
    pub fn is_human_annotation(self) -> bool {
        matches!(
            self,
            Phase::ParallelAnnotation
                | Phase::DisagreementResolution
                | Phase::ActiveAnnotation
                | Phase::PeriodicReview
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Setup => "SETUP",
            Phase::PromptReview => "PROMPT_REVIEW",
            Phase::EdgeCaseSynthesis => "EDGE_CASE_SYNTHESIS",
            Phase::EdgeCaseLabeling => "EDGE_CASE_LABELING",
            Phase::PromptValidation => "PROMPT_VALIDATION",
            Phase::ParallelAnnotation => "PARALLEL_ANNOTATION",
            Phase::DisagreementResolution => "DISAGREEMENT_RESOLUTION",
            Phase::ActiveAnnotation => "ACTIVE_ANNOTATION",
            Phase::PeriodicReview => "PERIODIC_REVIEW",
            Phase::AutonomousLabeling => "AUTONOMOUS_LABELING",
            Phase::FinalValidation => "FINAL_VALIDATION",
            Phase::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace(['-', ' '], "_");
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| SharedError::UnknownPhase { input: s.to_string() })
    }
}

/// Immutable record of one committed phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Set when the adjacency table was bypassed for manual recovery
    #[serde(default)]
    pub forced: bool,
}

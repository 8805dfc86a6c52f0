//! Running agreement statistics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction of recent agreement compared with the window before it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    #[default]
    Stable,
}

/// Agree/disagree counters for one label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub agreements: u64,
    pub disagreements: u64,
}

impl LabelCounts {
    pub fn total(&self) -> u64 {
        self.agreements + self.disagreements
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.agreements as f64 / total as f64,
        }
    }
}

/// Aggregate human/model agreement for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementMetrics {
    pub total_compared: u64,
    pub agreements: u64,
    pub disagreements: u64,
    pub agreement_rate: f64,
    /// Counters keyed by the model's label
    pub per_label: BTreeMap<String, LabelCounts>,
    /// model label -> corrected (human) label -> count, disagreements only
    pub confusion_matrix: BTreeMap<String, BTreeMap<String, u64>>,
    pub recent_agreement_rate: f64,
    pub trend: Trend,
}

impl AgreementMetrics {
    /// Recompute the overall rate from the counters
    pub fn recompute_rate(&mut self) {
        self.agreement_rate = if self.total_compared == 0 {
            0.0
        } else {
            self.agreements as f64 / self.total_compared as f64
        };
    }

    pub fn confusion_count(&self, model_label: &str, corrected_label: &str) -> u64 {
        self.confusion_matrix
            .get(model_label)
            .and_then(|row| row.get(corrected_label))
            .copied()
            .unwrap_or(0)
    }
}

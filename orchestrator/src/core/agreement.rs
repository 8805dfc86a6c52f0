//! Type-aware agreement evaluation
//!
//! Maps (annotation type, human label, model label, schema constraints) to a
//! verdict. Evaluation is a pure function of its inputs: the orchestrator
//! calls it live when a human label arrives and the tracker calls it again
//! when building confusion analytics, and both must see the same result.

use handoff_shared::{AnnotationType, DisagreementCategory, LabelValue, SchemaInfo, SpanLabel};
use serde::{Deserialize, Serialize};

use crate::config::EvaluatorConfig;

/// Outcome of comparing one human label against one model label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementVerdict {
    pub disagrees: bool,
    /// Set only when `disagrees` is true
    pub category: Option<DisagreementCategory>,
}

impl AgreementVerdict {
    pub fn agree() -> Self {
        Self { disagrees: false, category: None }
    }

    pub fn disagree(category: DisagreementCategory) -> Self {
        Self { disagrees: true, category: Some(category) }
    }

    pub fn agrees(&self) -> bool {
        !self.disagrees
    }

    fn from_match(matches: bool, category: DisagreementCategory) -> Self {
        if matches { Self::agree() } else { Self::disagree(category) }
    }
}

type Comparator = fn(&AgreementEvaluator, &LabelValue, &LabelValue, Option<&SchemaInfo>) -> AgreementVerdict;

/// Stateless evaluator holding only the default comparison constraints
#[derive(Debug, Clone, Default)]
pub struct AgreementEvaluator {
    config: EvaluatorConfig,
}

impl AgreementEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Compare a human label with a model label under the rule for `annotation_type`
    pub fn detect(
        &self,
        annotation_type: AnnotationType,
        human: &LabelValue,
        model: &LabelValue,
        schema: Option<&SchemaInfo>,
    ) -> AgreementVerdict {
        let comparator = Self::strategy(annotation_type);
        comparator(self, human, model, schema)
    }

    /// Convenience wrapper that takes the annotation type from the schema
    pub fn detect_for_schema(&self, schema: &SchemaInfo, human: &LabelValue, model: &LabelValue) -> AgreementVerdict {
        self.detect(schema.annotation_type, human, model, Some(schema))
    }

    fn strategy(annotation_type: AnnotationType) -> Comparator {
        match annotation_type {
            AnnotationType::Radio | AnnotationType::Select => Self::compare_categorical,
            AnnotationType::Likert => Self::compare_likert,
            AnnotationType::Multiselect => Self::compare_multiselect,
            AnnotationType::Text => Self::compare_text,
            AnnotationType::Span => Self::compare_spans,
            AnnotationType::Number => Self::compare_numeric,
            AnnotationType::Unknown => Self::compare_exact,
        }
    }

    fn compare_categorical(&self, human: &LabelValue, model: &LabelValue, _: Option<&SchemaInfo>) -> AgreementVerdict {
        AgreementVerdict::from_match(human.canonical() == model.canonical(), DisagreementCategory::LabelMismatch)
    }

    fn compare_likert(&self, human: &LabelValue, model: &LabelValue, schema: Option<&SchemaInfo>) -> AgreementVerdict {
        let (Some(h), Some(m)) = (human.as_integer(), model.as_integer()) else {
            return self.compare_exact(human, model, schema);
        };
        let tolerance = schema
            .and_then(|s| s.tolerance)
            .unwrap_or(self.config.likert_tolerance as f64);
        let distance = h.abs_diff(m) as f64;
        AgreementVerdict::from_match(distance <= tolerance, DisagreementCategory::ScaleDifference)
    }

    fn compare_multiselect(&self, human: &LabelValue, model: &LabelValue, schema: Option<&SchemaInfo>) -> AgreementVerdict {
        let (Some(h), Some(m)) = (human.as_option_set(), model.as_option_set()) else {
            return self.compare_exact(human, model, schema);
        };
        if h.is_empty() && m.is_empty() {
            return AgreementVerdict::agree();
        }
        let intersection = h.intersection(&m).count() as f64;
        let union = h.union(&m).count() as f64;
        let threshold = schema
            .and_then(|s| s.threshold)
            .unwrap_or(self.config.multiselect_threshold);
        AgreementVerdict::from_match(intersection / union >= threshold, DisagreementCategory::SetMismatch)
    }

    // Exact match after trimming and lowercasing; no semantic similarity
    fn compare_text(&self, human: &LabelValue, model: &LabelValue, _: Option<&SchemaInfo>) -> AgreementVerdict {
        let normalize = |v: &LabelValue| v.canonical().trim().to_lowercase();
        AgreementVerdict::from_match(normalize(human) == normalize(model), DisagreementCategory::TextMismatch)
    }

    fn compare_spans(&self, human: &LabelValue, model: &LabelValue, schema: Option<&SchemaInfo>) -> AgreementVerdict {
        let (Some(h), Some(m)) = (human.as_spans(), model.as_spans()) else {
            return self.compare_exact(human, model, schema);
        };
        let h = merge_spans(&h);
        let m = merge_spans(&m);
        match (h.is_empty(), m.is_empty()) {
            (true, true) => return AgreementVerdict::agree(),
            (true, false) | (false, true) => return AgreementVerdict::disagree(DisagreementCategory::SpanPresence),
            (false, false) => {}
        }

        let human_len: usize = h.iter().map(|(start, end)| end - start).sum();
        if human_len == 0 {
            // Only zero-width human spans: nothing to measure overlap against
            return AgreementVerdict::from_match(h == m, DisagreementCategory::SpanBoundary);
        }
        let overlap: usize = h
            .iter()
            .flat_map(|&(hs, he)| m.iter().map(move |&(ms, me)| he.min(me).saturating_sub(hs.max(ms))))
            .sum();
        let threshold = schema
            .and_then(|s| s.threshold)
            .unwrap_or(self.config.span_overlap_threshold);
        AgreementVerdict::from_match(
            overlap as f64 / human_len as f64 >= threshold,
            DisagreementCategory::SpanBoundary,
        )
    }

    fn compare_numeric(&self, human: &LabelValue, model: &LabelValue, schema: Option<&SchemaInfo>) -> AgreementVerdict {
        let (Some(h), Some(m)) = (human.as_number(), model.as_number()) else {
            return self.compare_exact(human, model, schema);
        };
        let tolerance = self.numeric_tolerance(h, schema);
        AgreementVerdict::from_match((h - m).abs() <= tolerance, DisagreementCategory::NumericDifference)
    }

    fn compare_exact(&self, human: &LabelValue, model: &LabelValue, _: Option<&SchemaInfo>) -> AgreementVerdict {
        AgreementVerdict::from_match(human.canonical() == model.canonical(), DisagreementCategory::ExactMismatch)
    }

    fn numeric_tolerance(&self, human: f64, schema: Option<&SchemaInfo>) -> f64 {
        if let Some(tolerance) = schema.and_then(|s| s.tolerance) {
            return tolerance;
        }
        match schema.and_then(SchemaInfo::value_range) {
            Some(range) => range * self.config.numeric_tolerance_ratio,
            None => (human.abs() * self.config.numeric_tolerance_ratio).max(self.config.numeric_min_tolerance),
        }
    }
}

/// Sort and merge overlapping spans into disjoint `(start, end)` ranges
fn merge_spans(spans: &[SpanLabel]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = spans.iter().map(|s| (s.start, s.end.max(s.start))).collect();
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

//! Agreement statistics and final-validation sampling
//!
//! The tracker owns the single `AgreementMetrics` object of a run. Rates are
//! always recomputed from the counters after each comparison, never updated
//! independently.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use handoff_shared::{
    AgreementMetrics, AnnotationType, Component, DisagreementCategory, LabelValue, SchemaInfo, Trend, component_debug,
    component_info,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::agreement::AgreementEvaluator;
use crate::config::AgreementConfig;

/// Stratum quotas in percent of the requested sample size
const LOW_QUOTA_PERCENT: usize = 40;
const MID_QUOTA_PERCENT: usize = 35;

/// Confidence band used for stratified sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceStratum {
    /// confidence < 0.5
    Low,
    /// 0.5 <= confidence < 0.8
    Mid,
    /// confidence >= 0.8
    High,
}

impl ConfidenceStratum {
    pub fn classify(confidence: f64) -> Self {
        if confidence < 0.5 {
            ConfidenceStratum::Low
        } else if confidence < 0.8 {
            ConfidenceStratum::Mid
        } else {
            ConfidenceStratum::High
        }
    }
}

/// A model-labeled instance eligible for validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCandidate {
    pub label: LabelValue,
    pub confidence: f64,
}

/// An instance picked for human spot-validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSample {
    pub instance_id: String,
    pub model_label: LabelValue,
    pub model_confidence: f64,
    pub stratum: ConfidenceStratum,
    pub selected_at: DateTime<Utc>,
    #[serde(default)]
    pub human_label: Option<LabelValue>,
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agrees: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One live human/model comparison, kept for retrospective analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub instance_id: String,
    pub schema_name: String,
    pub annotation_type: AnnotationType,
    pub human_label: LabelValue,
    pub model_label: LabelValue,
    pub agrees: bool,
    pub recorded_at: DateTime<Utc>,
}

/// A (model label, corrected label) pair and how often it occurred
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionPair {
    pub model_label: String,
    pub human_label: String,
    pub count: u64,
    /// Fraction of all disagreements
    pub share: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionAnalysis {
    /// Most frequent first
    pub pairs: Vec<ConfusionPair>,
    pub total_disagreements: u64,
    /// Disagreement categories from re-evaluating the comparison log
    pub categories: BTreeMap<DisagreementCategory, u64>,
    /// Logged comparisons whose recorded outcome differs from re-evaluation
    pub verdict_mismatches: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationProgress {
    pub selected: usize,
    pub validated: usize,
    pub agreements: usize,
    pub accuracy: f64,
}

/// Serializable tracker state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub metrics: AgreementMetrics,
    pub recent_outcomes: Vec<bool>,
    pub comparisons: Vec<ComparisonRecord>,
    pub samples: Vec<ValidationSample>,
}

/// Accumulates agreement statistics and manages validation samples
pub struct ValidationTracker {
    config: AgreementConfig,
    metrics: AgreementMetrics,
    /// Last `2 * trend_window` outcomes, oldest first
    recent_outcomes: VecDeque<bool>,
    /// Bounded by `comparison_log_limit`, oldest first
    comparisons: VecDeque<ComparisonRecord>,
    samples: Vec<ValidationSample>,
    sample_index: HashMap<String, usize>,
    rng: StdRng,
}

impl ValidationTracker {
    pub fn new(config: AgreementConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            recent_outcomes: VecDeque::with_capacity(config.trend_window * 2),
            config,
            metrics: AgreementMetrics::default(),
            comparisons: VecDeque::new(),
            samples: Vec::new(),
            sample_index: HashMap::new(),
            rng,
        }
    }

    pub fn restore(&mut self, snapshot: TrackerSnapshot) {
        self.metrics = snapshot.metrics;
        let keep = self.config.trend_window * 2;
        let skip = snapshot.recent_outcomes.len().saturating_sub(keep);
        self.recent_outcomes = snapshot.recent_outcomes.into_iter().skip(skip).collect();
        let skip = snapshot.comparisons.len().saturating_sub(self.config.comparison_log_limit);
        self.comparisons = snapshot.comparisons.into_iter().skip(skip).collect();
        self.sample_index = snapshot
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.instance_id.clone(), i))
            .collect();
        self.samples = snapshot.samples;
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            metrics: self.metrics.clone(),
            recent_outcomes: self.recent_outcomes.iter().copied().collect(),
            comparisons: self.comparisons.iter().cloned().collect(),
            samples: self.samples.clone(),
        }
    }

    pub fn metrics(&self) -> &AgreementMetrics {
        &self.metrics
    }

    /// Retained comparisons, oldest first
    pub fn comparisons(&self) -> impl Iterator<Item = &ComparisonRecord> {
        self.comparisons.iter()
    }

    /// Record one human/model comparison and refresh all derived statistics
    pub fn record_comparison(
        &mut self,
        instance_id: &str,
        human: &LabelValue,
        model: &LabelValue,
        schema: &SchemaInfo,
        agrees: bool,
    ) {
        let model_key = model.canonical();
        let metrics = &mut self.metrics;
        metrics.total_compared += 1;

        let counts = metrics.per_label.entry(model_key.clone()).or_default();
        if agrees {
            metrics.agreements += 1;
            counts.agreements += 1;
        } else {
            metrics.disagreements += 1;
            counts.disagreements += 1;
            *metrics
                .confusion_matrix
                .entry(model_key)
                .or_default()
                .entry(human.canonical())
                .or_insert(0) += 1;
        }

        self.comparisons.push_back(ComparisonRecord {
            instance_id: instance_id.to_string(),
            schema_name: schema.name.clone(),
            annotation_type: schema.annotation_type,
            human_label: human.clone(),
            model_label: model.clone(),
            agrees,
            recorded_at: Utc::now(),
        });
        while self.comparisons.len() > self.config.comparison_log_limit {
            self.comparisons.pop_front();
        }

        self.recent_outcomes.push_back(agrees);
        while self.recent_outcomes.len() > self.config.trend_window * 2 {
            self.recent_outcomes.pop_front();
        }

        self.recompute();

        component_debug!(
            Component::Tracker,
            "📊 Comparison {} [{}]: agrees={}, rate={:.3} over {}",
            instance_id,
            schema.name,
            agrees,
            self.metrics.agreement_rate,
            self.metrics.total_compared
        );
    }

    fn recompute(&mut self) {
        self.metrics.recompute_rate();

        let window = self.config.trend_window;
        let len = self.recent_outcomes.len();
        let recent_len = len.min(window);
        self.metrics.recent_agreement_rate = window_rate(self.recent_outcomes.iter().skip(len - recent_len));

        let previous_trend = self.metrics.trend;
        self.metrics.trend = if self.metrics.total_compared < (window * 2) as u64 || len < window * 2 {
            Trend::Stable
        } else {
            let previous = window_rate(self.recent_outcomes.iter().take(window));
            let recent = window_rate(self.recent_outcomes.iter().skip(window));
            let delta = recent - previous;
            if delta > self.config.trend_delta {
                Trend::Improving
            } else if delta < -self.config.trend_delta {
                Trend::Declining
            } else {
                Trend::Stable
            }
        };

        if self.metrics.trend != previous_trend {
            component_info!(
                Component::Tracker,
                "📈 Agreement trend changed {:?} -> {:?} (recent rate {:.3})",
                previous_trend,
                self.metrics.trend,
                self.metrics.recent_agreement_rate
            );
        }
    }

    /// True once enough comparisons exist and the rate meets the threshold
    pub fn should_end_human_annotation(&self) -> bool {
        self.metrics.total_compared >= self.config.minimum_sample
            && self.metrics.agreement_rate >= self.config.threshold
    }

    /// Confidence-stratified sample of up to `n` not-yet-selected candidates.
    ///
    /// Quotas are 40% low / 35% mid / 25% high confidence. A stratum that
    /// cannot fill its quota hands the shortfall to the others in the order
    /// high, mid, low. Ids selected by earlier calls are never selected again.
    pub fn select_validation_sample(
        &mut self,
        candidates: &HashMap<String, ValidationCandidate>,
        n: usize,
    ) -> Vec<String> {
        let mut strata: [Vec<&String>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut ids: Vec<&String> = candidates
            .keys()
            .filter(|id| !self.sample_index.contains_key(id.as_str()))
            .collect();
        ids.sort();
        for id in ids {
            let stratum = ConfidenceStratum::classify(candidates[id].confidence);
            strata[stratum_slot(stratum)].push(id);
        }

        let low_quota = n * LOW_QUOTA_PERCENT / 100;
        let mid_quota = n * MID_QUOTA_PERCENT / 100;
        let high_quota = n - low_quota - mid_quota;
        let mut take = [
            low_quota.min(strata[0].len()),
            mid_quota.min(strata[1].len()),
            high_quota.min(strata[2].len()),
        ];

        let mut shortfall = n - take.iter().sum::<usize>();
        for slot in [2, 1, 0] {
            if shortfall == 0 {
                break;
            }
            let extra = shortfall.min(strata[slot].len() - take[slot]);
            take[slot] += extra;
            shortfall -= extra;
        }

        let now = Utc::now();
        let mut selected = Vec::with_capacity(n);
        for slot in 0..3 {
            let chosen: Vec<String> = strata[slot]
                .choose_multiple(&mut self.rng, take[slot])
                .map(|id| (*id).clone())
                .collect();
            for id in chosen {
                let candidate = &candidates[&id];
                self.sample_index.insert(id.clone(), self.samples.len());
                self.samples.push(ValidationSample {
                    instance_id: id.clone(),
                    model_label: candidate.label.clone(),
                    model_confidence: candidate.confidence,
                    stratum: ConfidenceStratum::classify(candidate.confidence),
                    selected_at: now,
                    human_label: None,
                    validated_at: None,
                    agrees: None,
                    notes: None,
                });
                selected.push(id);
            }
        }

        component_info!(
            Component::Tracker,
            "🎯 Selected {} validation samples (requested {}, low={}, mid={}, high={})",
            selected.len(),
            n,
            take[0],
            take[1],
            take[2]
        );
        selected
    }

    /// Mark a selected sample validated; false if `instance_id` was never selected
    pub fn record_validation_result(&mut self, instance_id: &str, human_label: LabelValue) -> bool {
        self.record_validation_with_notes(instance_id, human_label, None)
    }

    pub fn record_validation_with_notes(
        &mut self,
        instance_id: &str,
        human_label: LabelValue,
        notes: Option<String>,
    ) -> bool {
        let Some(&index) = self.sample_index.get(instance_id) else {
            return false;
        };
        let sample = &mut self.samples[index];
        sample.agrees = Some(sample.model_label.canonical() == human_label.canonical());
        sample.human_label = Some(human_label);
        sample.validated_at = Some(Utc::now());
        if notes.is_some() {
            sample.notes = notes;
        }
        true
    }

    pub fn samples(&self) -> &[ValidationSample] {
        &self.samples
    }

    pub fn is_selected(&self, instance_id: &str) -> bool {
        self.sample_index.contains_key(instance_id)
    }

    pub fn validation_progress(&self) -> ValidationProgress {
        let validated: Vec<&ValidationSample> = self.samples.iter().filter(|s| s.validated_at.is_some()).collect();
        let agreements = validated.iter().filter(|s| s.agrees == Some(true)).count();
        ValidationProgress {
            selected: self.samples.len(),
            validated: validated.len(),
            agreements,
            accuracy: if validated.is_empty() {
                0.0
            } else {
                agreements as f64 / validated.len() as f64
            },
        }
    }

    /// Rank confusion pairs by frequency and re-evaluate the comparison log.
    ///
    /// `schemas` supplies comparison constraints; comparisons for schemas not
    /// listed are re-evaluated with the evaluator defaults. Categories and
    /// verdict mismatches cover the retained comparison window only.
    pub fn get_confusion_analysis(&self, evaluator: &AgreementEvaluator, schemas: &[SchemaInfo]) -> ConfusionAnalysis {
        let total = self.metrics.disagreements;
        let mut pairs: Vec<ConfusionPair> = self
            .metrics
            .confusion_matrix
            .iter()
            .flat_map(|(model_label, row)| {
                row.iter().map(move |(human_label, &count)| ConfusionPair {
                    model_label: model_label.clone(),
                    human_label: human_label.clone(),
                    count,
                    share: if total == 0 { 0.0 } else { count as f64 / total as f64 },
                })
            })
            .collect();
        pairs.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.model_label.cmp(&b.model_label))
                .then_with(|| a.human_label.cmp(&b.human_label))
        });

        let schema_map: HashMap<&str, &SchemaInfo> = schemas.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut categories = BTreeMap::new();
        let mut verdict_mismatches = 0;
        for record in &self.comparisons {
            let schema = schema_map.get(record.schema_name.as_str()).copied();
            let verdict = evaluator.detect(record.annotation_type, &record.human_label, &record.model_label, schema);
            if verdict.agrees() != record.agrees {
                verdict_mismatches += 1;
            }
            if let Some(category) = verdict.category {
                *categories.entry(category).or_insert(0) += 1;
            }
        }

        ConfusionAnalysis {
            pairs,
            total_disagreements: total,
            categories,
            verdict_mismatches,
        }
    }

    /// Agreement rate per model label
    pub fn get_label_accuracy(&self) -> BTreeMap<String, f64> {
        self.metrics
            .per_label
            .iter()
            .map(|(label, counts)| (label.clone(), counts.accuracy()))
            .collect()
    }
}

fn stratum_slot(stratum: ConfidenceStratum) -> usize {
    match stratum {
        ConfidenceStratum::Low => 0,
        ConfidenceStratum::Mid => 1,
        ConfidenceStratum::High => 2,
    }
}

fn window_rate<'a>(outcomes: impl Iterator<Item = &'a bool>) -> f64 {
    let (agreed, total) = outcomes.fold((0usize, 0usize), |(a, t), &o| (a + o as usize, t + 1));
    if total == 0 { 0.0 } else { agreed as f64 / total as f64 }
}

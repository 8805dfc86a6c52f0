//! Weighted pool selection of the next instance for human review

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use handoff_shared::{Component, component_debug};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::state::PredictionTable;
use crate::config::PoolWeights;
use crate::error::{OrchestratorError, OrchestratorResult};

const WEIGHT_EPSILON: f64 = 1e-6;

/// Audit entries kept; totals are counted separately
const SELECTION_LOG_LIMIT: usize = 1000;

/// Candidate pool an instance was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    LowConfidence,
    Diverse,
    Disagreement,
    Random,
    /// Uniform pick used when every weighted pool is empty
    Fallback,
}

impl PoolKind {
    /// The four weighted pools, in draw order
    pub const WEIGHTED: [PoolKind; 4] = [
        PoolKind::LowConfidence,
        PoolKind::Diverse,
        PoolKind::Disagreement,
        PoolKind::Random,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PoolKind::LowConfidence => "low_confidence",
            PoolKind::Diverse => "diverse",
            PoolKind::Disagreement => "disagreement",
            PoolKind::Random => "random",
            PoolKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool weights, always summing to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionWeights {
    low_confidence: f64,
    diverse: f64,
    random: f64,
    disagreement: f64,
}

impl SelectionWeights {
    /// Validate and normalize; negative, non-finite or all-zero weights are rejected
    pub fn new(low_confidence: f64, diverse: f64, random: f64, disagreement: f64) -> OrchestratorResult<Self> {
        let raw = [low_confidence, diverse, random, disagreement];
        if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(OrchestratorError::InvalidWeights {
                message: format!("weights must be finite and non-negative, got {raw:?}"),
            });
        }
        let sum: f64 = raw.iter().sum();
        if sum <= 0.0 {
            return Err(OrchestratorError::InvalidWeights {
                message: "at least one weight must be positive".to_string(),
            });
        }

        let mut weights = Self {
            low_confidence,
            diverse,
            random,
            disagreement,
        };
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            weights.low_confidence /= sum;
            weights.diverse /= sum;
            weights.random /= sum;
            weights.disagreement /= sum;
        }
        Ok(weights)
    }

    pub fn from_config(config: &PoolWeights) -> OrchestratorResult<Self> {
        Self::new(config.low_confidence, config.diverse, config.random, config.disagreement)
    }

    pub fn weight(&self, pool: PoolKind) -> f64 {
        match pool {
            PoolKind::LowConfidence => self.low_confidence,
            PoolKind::Diverse => self.diverse,
            PoolKind::Disagreement => self.disagreement,
            PoolKind::Random => self.random,
            PoolKind::Fallback => 0.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.low_confidence + self.diverse + self.random + self.disagreement
    }
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            low_confidence: 0.4,
            diverse: 0.3,
            random: 0.2,
            disagreement: 0.1,
        }
    }
}

/// Audit entry for one selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub pool: PoolKind,
    pub instance_id: String,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionStats {
    pub total_selections: usize,
    pub per_pool: BTreeMap<PoolKind, usize>,
    pub pool_sizes: BTreeMap<PoolKind, usize>,
}

pub struct InstanceSelector {
    weights: SelectionWeights,
    /// (id, lowest confidence across its predictions), in availability order
    low_confidence: Vec<(String, f64)>,
    diverse: Vec<String>,
    disagreement: Vec<String>,
    random: Vec<String>,
    diversity_order: Vec<String>,
    log: VecDeque<SelectionRecord>,
    per_pool: BTreeMap<PoolKind, usize>,
    total_selections: usize,
    rng: StdRng,
}

impl InstanceSelector {
    pub fn new(weights: SelectionWeights, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            weights,
            low_confidence: Vec::new(),
            diverse: Vec::new(),
            disagreement: Vec::new(),
            random: Vec::new(),
            diversity_order: Vec::new(),
            log: VecDeque::new(),
            per_pool: BTreeMap::new(),
            total_selections: 0,
            rng,
        }
    }

    pub fn weights(&self) -> SelectionWeights {
        self.weights
    }

    pub fn set_weights(&mut self, weights: SelectionWeights) {
        self.weights = weights;
    }

    /// Store an externally computed most-diverse-first ordering
    pub fn set_diversity_order(&mut self, order: Vec<String>) {
        self.diversity_order = order;
    }

    /// Rebuild all four pools from current engine state
    pub fn refresh_pools(
        &mut self,
        available: &[String],
        predictions: &PredictionTable,
        disagreement_ids: &HashSet<String>,
        confidence_threshold: f64,
    ) {
        let available_set: HashSet<&str> = available.iter().map(String::as_str).collect();

        self.low_confidence = available
            .iter()
            .filter_map(|id| {
                let lowest = predictions
                    .get(id)?
                    .values()
                    .map(|p| p.confidence)
                    .fold(f64::INFINITY, f64::min);
                (lowest < confidence_threshold).then(|| (id.clone(), lowest))
            })
            .collect();
        self.disagreement = available
            .iter()
            .filter(|id| disagreement_ids.contains(id.as_str()))
            .cloned()
            .collect();
        self.diverse = self
            .diversity_order
            .iter()
            .filter(|id| available_set.contains(id.as_str()))
            .cloned()
            .collect();
        self.random = available.to_vec();

        component_debug!(
            Component::Selector,
            "🔄 Pools refreshed: low_confidence={}, diverse={}, disagreement={}, random={}",
            self.low_confidence.len(),
            self.diverse.len(),
            self.disagreement.len(),
            self.random.len()
        );
    }

    pub fn pool_sizes(&self) -> BTreeMap<PoolKind, usize> {
        BTreeMap::from([
            (PoolKind::LowConfidence, self.low_confidence.len()),
            (PoolKind::Diverse, self.diverse.len()),
            (PoolKind::Disagreement, self.disagreement.len()),
            (PoolKind::Random, self.random.len()),
        ])
    }

    /// Pick the next instance, or `None` if nothing in `available` is left
    pub fn select_next(&mut self, available: &[String], exclude: &HashSet<String>) -> Option<String> {
        let eligible: HashSet<&str> = available
            .iter()
            .map(String::as_str)
            .filter(|id| !exclude.contains(*id))
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let mut candidates: HashMap<PoolKind, Vec<String>> = HashMap::new();
        for pool in PoolKind::WEIGHTED {
            let members: Vec<String> = self
                .pool_members(pool)
                .into_iter()
                .filter(|id| eligible.contains(id.as_str()))
                .cloned()
                .collect();
            if !members.is_empty() {
                candidates.insert(pool, members);
            }
        }

        let total: f64 = candidates.keys().map(|pool| self.weights.weight(*pool)).sum();
        let mut chosen = None;
        if total > 0.0 {
            let mut roll = self.rng.gen_range(0.0..total);
            for pool in PoolKind::WEIGHTED {
                let weight = self.weights.weight(pool);
                if weight <= 0.0 || !candidates.contains_key(&pool) {
                    continue;
                }
                chosen = Some(pool);
                roll -= weight;
                if roll < 0.0 {
                    break;
                }
            }
        }

        let (pool, id) = match chosen {
            Some(pool) => (pool, self.pick_from(pool, &candidates[&pool])),
            None => (PoolKind::Fallback, self.pick_fallback(available, &eligible)),
        };

        let id = id?;
        component_debug!(Component::Selector, "🎲 Selected {} from {} pool", id, pool);
        *self.per_pool.entry(pool).or_insert(0) += 1;
        self.total_selections += 1;
        if self.log.len() == SELECTION_LOG_LIMIT {
            self.log.pop_front();
        }
        self.log.push_back(SelectionRecord {
            pool,
            instance_id: id.clone(),
            selected_at: Utc::now(),
        });
        Some(id)
    }

    /// Up to `n` distinct ids, all from `available`
    pub fn select_batch(&mut self, available: &[String], n: usize, exclude: &HashSet<String>) -> Vec<String> {
        let mut exclude = exclude.clone();
        let mut batch = Vec::with_capacity(n);
        while batch.len() < n {
            let Some(id) = self.select_next(available, &exclude) else {
                break;
            };
            exclude.insert(id.clone());
            batch.push(id);
        }
        batch
    }

    /// Most recent selections, oldest first
    pub fn selection_log(&self) -> impl Iterator<Item = &SelectionRecord> {
        self.log.iter()
    }

    pub fn get_selection_stats(&self) -> SelectionStats {
        SelectionStats {
            total_selections: self.total_selections,
            per_pool: self.per_pool.clone(),
            pool_sizes: self.pool_sizes(),
        }
    }

    fn pool_members(&self, pool: PoolKind) -> Vec<&String> {
        match pool {
            PoolKind::LowConfidence => self.low_confidence.iter().map(|(id, _)| id).collect(),
            PoolKind::Diverse => self.diverse.iter().collect(),
            PoolKind::Disagreement => self.disagreement.iter().collect(),
            PoolKind::Random => self.random.iter().collect(),
            PoolKind::Fallback => Vec::new(),
        }
    }

    fn pick_from(&mut self, pool: PoolKind, members: &[String]) -> Option<String> {
        match pool {
            PoolKind::LowConfidence => {
                let mut best: Option<(&String, f64)> = None;
                for (id, confidence) in &self.low_confidence {
                    if !members.contains(id) {
                        continue;
                    }
                    if best.is_none_or(|(_, lowest)| *confidence < lowest) {
                        best = Some((id, *confidence));
                    }
                }
                best.map(|(id, _)| id.clone())
            }
            PoolKind::Diverse => members.first().cloned(),
            _ => members.choose(&mut self.rng).cloned(),
        }
    }

    fn pick_fallback(&mut self, available: &[String], eligible: &HashSet<&str>) -> Option<String> {
        let remaining: Vec<&String> = available.iter().filter(|id| eligible.contains(id.as_str())).collect();
        remaining.choose(&mut self.rng).map(|id| (*id).clone())
    }
}

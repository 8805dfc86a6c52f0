//! Model labeling: response parsing and an offline simulated model
//!
//! `parse_label_response` is the only place raw model output becomes a
//! `LabelResponse`. It accepts a bare JSON object, and as its single fallback
//! the first balanced `{...}` object embedded in surrounding prose.

use std::collections::HashMap;

use async_trait::async_trait;
use handoff_shared::{AnnotationType, Component, LabelValue, SchemaInfo, SharedError, component_debug};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use super::item_store::JsonlItemStore;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{LabelResponse, LabelingService};

/// Parse raw model output into a label response; confidence is clamped to [0, 1]
pub fn parse_label_response(raw: &str) -> OrchestratorResult<LabelResponse> {
    let trimmed = raw.trim();
    let mut response: LabelResponse = match serde_json::from_str(trimmed) {
        Ok(response) => response,
        Err(strict_err) => {
            let embedded = first_json_object(trimmed).ok_or_else(|| SharedError::DeserializationError {
                message: format!("no JSON object in model output: {strict_err}"),
            })?;
            serde_json::from_str(embedded).map_err(|e| SharedError::DeserializationError {
                message: format!("embedded object is not a label response: {e}"),
            })?
        }
    };

    response.confidence = if response.confidence.is_finite() {
        response.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Ok(response)
}

/// First balanced `{...}` in `text`, ignoring braces inside JSON strings
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Offline stand-in for an LLM labeler.
///
/// Knows reference labels by instance text. Answers correctly with probability
/// `accuracy`, and reports higher confidence when it is right. Output goes
/// through `parse_label_response` like a real completion would.
pub struct SimulatedLabeler {
    /// text -> schema_name -> reference label
    gold: HashMap<String, HashMap<String, LabelValue>>,
    accuracy: f64,
    model_name: String,
    rng: Mutex<StdRng>,
}

impl SimulatedLabeler {
    pub fn new(accuracy: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            gold: HashMap::new(),
            accuracy: accuracy.clamp(0.0, 1.0),
            model_name: "simulated-labeler".to_string(),
            rng: Mutex::new(rng),
        }
    }

    pub fn with_gold(mut self, text: impl Into<String>, schema_name: impl Into<String>, label: LabelValue) -> Self {
        self.gold.entry(text.into()).or_default().insert(schema_name.into(), label);
        self
    }

    /// Learn every reference label present in `store`
    pub fn from_store(store: &JsonlItemStore, accuracy: f64, seed: Option<u64>) -> Self {
        let mut labeler = Self::new(accuracy, seed);
        for item in store.items() {
            for (schema_name, label) in &item.gold {
                labeler = labeler.with_gold(item.text.clone(), schema_name.clone(), label.clone());
            }
        }
        labeler
    }

    fn wrong_label(rng: &mut StdRng, schema: &SchemaInfo, gold: Option<&LabelValue>) -> Option<LabelValue> {
        let others: Vec<&String> = schema
            .labels
            .iter()
            .filter(|label| gold.is_none_or(|g| g.canonical() != **label))
            .collect();
        match schema.annotation_type {
            AnnotationType::Likert | AnnotationType::Number => {
                let (min, max) = (schema.min_value?, schema.max_value?);
                let base = gold.and_then(LabelValue::as_number).unwrap_or(min);
                let shifted = if base + 2.0 <= max { base + 2.0 } else { base - 2.0 };
                Some(LabelValue::number(shifted.clamp(min, max)))
            }
            AnnotationType::Multiselect => others.choose(rng).map(|label| LabelValue::Options(vec![(*label).clone()])),
            _ => others.choose(rng).map(|label| LabelValue::text((*label).clone())),
        }
    }

    fn render(label: &LabelValue, confidence: f64, rng: &mut StdRng) -> OrchestratorResult<String> {
        let body = serde_json::json!({
            "label": label,
            "confidence": confidence,
            "reasoning": "simulated",
        });
        let json = serde_json::to_string(&body)?;
        // Chat models sometimes wrap the object in prose
        Ok(if rng.gen_bool(0.2) {
            format!("Here is my answer: {json} Let me know if you need more.")
        } else {
            json
        })
    }
}

#[async_trait]
impl LabelingService for SimulatedLabeler {
    async fn label(&self, text: &str, schema: &SchemaInfo) -> OrchestratorResult<LabelResponse> {
        let gold = self.gold.get(text).and_then(|by_schema| by_schema.get(&schema.name));
        let mut rng = self.rng.lock().await;

        let correct = gold.is_some() && rng.gen_bool(self.accuracy);
        let (label, confidence) = match (correct, gold) {
            (true, Some(gold)) => (gold.clone(), rng.gen_range(0.75..0.99)),
            _ => match Self::wrong_label(&mut rng, schema, gold) {
                Some(label) => (label, rng.gen_range(0.3..0.7)),
                None => match gold {
                    Some(gold) => (gold.clone(), rng.gen_range(0.3..0.6)),
                    None => {
                        return Err(OrchestratorError::labeling(
                            text.chars().take(32).collect::<String>(),
                            format!("no reference or candidate labels for schema '{}'", schema.name),
                        ));
                    }
                },
            },
        };

        let raw = Self::render(&label, confidence, &mut rng)?;
        drop(rng);

        component_debug!(Component::Worker, "🤖 Simulated completion for '{}': {}", schema.name, raw);
        parse_label_response(&raw)
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

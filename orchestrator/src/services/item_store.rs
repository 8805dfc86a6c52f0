//! JSONL-backed item store
//!
//! Each non-empty line is `{"id": ..., "text": ..., "gold": ...}` where
//! `gold` optionally maps schema names to reference labels.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use handoff_shared::{Component, LabelValue, component_info};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::ItemStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub text: String,
    /// schema_name -> reference label
    #[serde(default)]
    pub gold: BTreeMap<String, LabelValue>,
}

pub struct JsonlItemStore {
    order: Vec<String>,
    items: HashMap<String, Item>,
}

impl JsonlItemStore {
    pub fn from_items(items: Vec<Item>) -> Self {
        let order = items.iter().map(|item| item.id.clone()).collect();
        let items = items.into_iter().map(|item| (item.id.clone(), item)).collect();
        Self { order, items }
    }

    /// Parse JSONL content; duplicate ids keep the first occurrence
    pub fn parse(content: &str) -> OrchestratorResult<Self> {
        let mut items: Vec<Item> = Vec::new();
        let mut seen = HashSet::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let item: Item = serde_json::from_str(line).map_err(|e| {
                OrchestratorError::config("items", format!("line {}: {}", line_no + 1, e))
            })?;
            if seen.insert(item.id.clone()) {
                items.push(item);
            }
        }
        Ok(Self::from_items(items))
    }

    pub async fn load(path: &Path) -> OrchestratorResult<Self> {
        let content = fs::read_to_string(path).await?;
        let store = Self::parse(&content)?;
        component_info!(Component::Store, "📚 Loaded {} items from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Items in file order
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn gold(&self, instance_id: &str, schema_name: &str) -> Option<&LabelValue> {
        self.items.get(instance_id)?.gold.get(schema_name)
    }
}

#[async_trait]
impl ItemStore for JsonlItemStore {
    async fn get_text(&self, instance_id: &str) -> Option<String> {
        self.items.get(instance_id).map(|item| item.text.clone())
    }

    async fn instance_ids(&self) -> Vec<String> {
        self.order.clone()
    }
}

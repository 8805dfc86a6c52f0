//! Trait definitions with mockall annotations for testing
//!
//! The engine talks to everything outside its own memory through these
//! traits. Real implementations live in `services`; tests inject mocks.

use handoff_shared::{LabelValue, SchemaInfo};
use serde::{Deserialize, Serialize};

use crate::core::EngineSnapshot;
use crate::error::OrchestratorResult;

/// What the labeling service returns for one (text, schema) request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResponse {
    pub label: LabelValue,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Model labeling abstraction
///
/// Calls may be slow and may fail; the engine never holds its lock across one.
#[mockall::automock]
#[async_trait::async_trait]
pub trait LabelingService: Send + Sync {
    /// Label one piece of text for one schema
    ///
    /// # Parameters
    /// - `text`: The instance text to label
    /// - `schema`: Schema describing the annotation type and allowed labels
    ///
    /// # Returns
    /// The label with its confidence and optional reasoning, or `LabelingFailed`
    async fn label(&self, text: &str, schema: &SchemaInfo) -> OrchestratorResult<LabelResponse>;

    /// Name recorded on every prediction this service produces
    fn model_name(&self) -> String;
}

/// Diversity ordering abstraction
#[mockall::automock]
#[async_trait::async_trait]
pub trait DiversityService: Send + Sync {
    /// Order `available_ids` most-diverse first
    ///
    /// Ids the service does not know may be dropped; an empty result simply
    /// leaves the diverse pool empty.
    async fn order(&self, available_ids: Vec<String>) -> Vec<String>;
}

/// Read-only access to the items being annotated
#[mockall::automock]
#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    /// Text of one instance, `None` if the id is unknown
    async fn get_text(&self, instance_id: &str) -> Option<String>;

    /// Every instance id, in a stable order
    async fn instance_ids(&self) -> Vec<String>;
}

/// Durable storage for engine snapshots
#[mockall::automock]
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot, replacing any previous one atomically
    async fn save(&self, snapshot: &EngineSnapshot) -> OrchestratorResult<()>;

    /// Load the last saved snapshot
    ///
    /// # Returns
    /// `Ok(None)` when nothing has been saved yet
    async fn load(&self) -> OrchestratorResult<Option<EngineSnapshot>>;
}

//! Orchestration engine for handing annotation work from humans to a model
//!
//! The engine tracks human/model agreement while both label the same items,
//! decides when the model is trustworthy enough to continue alone, runs the
//! autonomous labeling worker, and samples its output for final validation.

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod traits;
pub mod worker;

// Re-export commonly used types
pub use config::EngineConfig;
pub use crate::core::{AgreementEvaluator, InstanceSelector, PhaseController, SelectionWeights, ValidationTracker};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{Components, Orchestrator, OrchestratorStatus};
pub use traits::{DiversityService, ItemStore, LabelResponse, LabelingService, SnapshotStore};
pub use worker::{LabelingOutcome, WorkerReport, WorkerState};

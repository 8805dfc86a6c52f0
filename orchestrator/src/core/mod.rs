//! Core business logic modules
//!
//! Pure in-memory logic with no I/O dependencies. Randomized parts take an
//! optional seed so tests stay deterministic.

pub mod agreement;
pub mod phase;
pub mod selection;
pub mod state;
pub mod validation;

pub use agreement::{AgreementEvaluator, AgreementVerdict};
pub use phase::{PhaseController, PhaseSnapshot};
pub use selection::{InstanceSelector, PoolKind, SelectionStats, SelectionWeights};
pub use state::{EngineSnapshot, EngineState, PredictionTable, SNAPSHOT_VERSION};
pub use validation::{
    ConfidenceStratum, ConfusionAnalysis, ValidationCandidate, ValidationProgress, ValidationSample,
    ValidationTracker,
};

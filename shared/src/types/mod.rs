//! Core types used throughout the annotation handoff system

pub mod label;
pub mod metrics;
pub mod phase;
pub mod record;

pub use label::{AnnotationType, LabelValue, SchemaInfo, SpanLabel};
pub use metrics::{AgreementMetrics, LabelCounts, Trend};
pub use phase::{Phase, PhaseTransition};
pub use record::{Disagreement, DisagreementCategory, ModelPrediction, ResolutionSource};

//! Shared types for the human/LLM annotation handoff system
//!
//! Contains the value types exchanged between the orchestration core and
//! whatever presentation layer sits on top of it, plus logging helpers.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use logging::Component;
pub use types::*;

//! Common test utilities and infrastructure
//!
//! Shared fixtures, mock setups and the orchestrator builder used across the
//! orchestrator test suites.

pub mod fixtures;
pub mod helpers;

pub use fixtures::TestFixtures;
pub use helpers::{OrchestratorBuilder, TestHelpers, TestOrchestrator};

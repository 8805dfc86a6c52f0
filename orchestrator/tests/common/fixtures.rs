//! Test fixtures and data for orchestrator tests

use handoff_shared::{AnnotationType, SchemaInfo};
use orchestrator::EngineConfig;
use orchestrator::services::Item;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const SENTIMENT: &'static str = "sentiment";
    pub const QUALITY: &'static str = "quality";
    pub const ANNOTATOR: &'static str = "alice";
    pub const OTHER_ANNOTATOR: &'static str = "bob";
    pub const MODEL_NAME: &'static str = "mock-model";
    pub const SEED: u64 = 42;

    pub fn sentiment_schema() -> SchemaInfo {
        SchemaInfo::new(Self::SENTIMENT, AnnotationType::Radio).with_labels(&["positive", "negative", "neutral"])
    }

    /// 1-5 likert scale with a tolerance of one point
    pub fn quality_schema() -> SchemaInfo {
        SchemaInfo::new(Self::QUALITY, AnnotationType::Likert)
            .with_range(1.0, 5.0)
            .with_tolerance(1.0)
    }

    /// Seeded config with fast worker timings and a single sentiment schema
    pub fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.schemas = vec![Self::sentiment_schema()];
        config.rng_seed = Some(Self::SEED);
        config.worker.batch_size = 2;
        config.worker.poll_interval_ms = 10;
        config.worker.pause_poll_ms = 10;
        config.worker.error_backoff_ms = 10;
        config.worker.stop_timeout_ms = 1000;
        config
    }

    /// Handoff criteria used by the likert scenarios: 90% over at least 50 comparisons
    pub fn likert_config() -> EngineConfig {
        let mut config = Self::config();
        config.schemas = vec![Self::quality_schema()];
        config.agreement.threshold = 0.9;
        config.agreement.minimum_sample = 50;
        config
    }

    pub fn instance_id(i: usize) -> String {
        format!("item-{i}")
    }

    /// `count` items with distinct texts and no reference labels
    pub fn items(count: usize) -> Vec<Item> {
        (0..count)
            .map(|i| Item {
                id: Self::instance_id(i),
                text: format!("text of item {i}"),
                gold: Default::default(),
            })
            .collect()
    }
}

//! Diversity ordering used when no embedding service is configured

use async_trait::async_trait;

use crate::traits::DiversityService;

/// Returns ids in the order they were given
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDiversity;

#[async_trait]
impl DiversityService for PassthroughDiversity {
    async fn order(&self, available_ids: Vec<String>) -> Vec<String> {
        available_ids
    }
}

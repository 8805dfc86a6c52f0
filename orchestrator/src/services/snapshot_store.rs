//! File-backed snapshot persistence
//!
//! Snapshots are written to a sibling temp file and renamed over the target,
//! so a crash mid-write never leaves a truncated snapshot behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use handoff_shared::{Component, component_debug};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::EngineSnapshot;
use crate::error::OrchestratorResult;
use crate::traits::SnapshotStore;

pub struct FileSnapshotStore {
    path: PathBuf,
    /// Saves share one temp file, so they must not interleave
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &EngineSnapshot) -> OrchestratorResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;

        component_debug!(
            Component::Store,
            "💾 Saved snapshot ({} predictions) to {}",
            snapshot.predictions.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn load(&self) -> OrchestratorResult<Option<EngineSnapshot>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).await?;
        let snapshot = serde_json::from_str(&content)?;
        component_debug!(Component::Store, "📂 Loaded snapshot from {}", self.path.display());
        Ok(Some(snapshot))
    }
}

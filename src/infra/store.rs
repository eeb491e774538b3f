//! Persistence collaborator: trait plus in-memory and file-backed stores.
//!
//! No transactional guarantee beyond last-write-wins per key. Unit writes
//! are upserts keyed by position, which keeps every pipeline side effect
//! idempotent.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::outline::Outline;
use crate::domain::units::RenderedUnit;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait DeckStore: Send + Sync {
    async fn upsert_unit(&self, project: Uuid, unit: &RenderedUnit) -> Result<(), StoreError>;
    async fn fetch_unit(
        &self,
        project: Uuid,
        position: u32,
    ) -> Result<Option<RenderedUnit>, StoreError>;
    async fn get_outline(&self, project: Uuid) -> Result<Option<Outline>, StoreError>;
    async fn save_outline(&self, project: Uuid, outline: &Outline) -> Result<(), StoreError>;
    async fn manually_edited_positions(&self, project: Uuid) -> Result<Vec<u32>, StoreError>;
    async fn mark_manually_edited(&self, project: Uuid, position: u32) -> Result<(), StoreError>;
    async fn get_style_guide(&self, project: Uuid) -> Result<Option<String>, StoreError>;
    async fn put_style_guide(&self, project: Uuid, guide: &str) -> Result<(), StoreError>;
}

/// Volatile store used by tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    units: DashMap<(Uuid, u32), RenderedUnit>,
    outlines: DashMap<Uuid, Outline>,
    edited: DashMap<Uuid, BTreeSet<u32>>,
    style_guides: DashMap<Uuid, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeckStore for MemoryStore {
    async fn upsert_unit(&self, project: Uuid, unit: &RenderedUnit) -> Result<(), StoreError> {
        self.units.insert((project, unit.position), unit.clone());
        Ok(())
    }

    async fn fetch_unit(
        &self,
        project: Uuid,
        position: u32,
    ) -> Result<Option<RenderedUnit>, StoreError> {
        Ok(self
            .units
            .get(&(project, position))
            .map(|entry| entry.value().clone()))
    }

    async fn get_outline(&self, project: Uuid) -> Result<Option<Outline>, StoreError> {
        Ok(self.outlines.get(&project).map(|entry| entry.value().clone()))
    }

    async fn save_outline(&self, project: Uuid, outline: &Outline) -> Result<(), StoreError> {
        self.outlines.insert(project, outline.clone());
        Ok(())
    }

    async fn manually_edited_positions(&self, project: Uuid) -> Result<Vec<u32>, StoreError> {
        Ok(self
            .edited
            .get(&project)
            .map(|entry| entry.value().iter().copied().collect())
            .unwrap_or_default())
    }

    async fn mark_manually_edited(&self, project: Uuid, position: u32) -> Result<(), StoreError> {
        self.edited.entry(project).or_default().insert(position);
        Ok(())
    }

    async fn get_style_guide(&self, project: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .style_guides
            .get(&project)
            .map(|entry| entry.value().clone()))
    }

    async fn put_style_guide(&self, project: Uuid, guide: &str) -> Result<(), StoreError> {
        self.style_guides.insert(project, guide.to_string());
        Ok(())
    }
}

/// Durable store laying projects out as JSON files under a root directory:
/// `<root>/<project>/outline.json`, `units/NNN.json`, `edited.json`,
/// `style_guide.txt`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, project: Uuid) -> PathBuf {
        self.root.join(project.to_string())
    }

    fn unit_path(&self, project: Uuid, position: u32) -> PathBuf {
        self.project_dir(project)
            .join("units")
            .join(format!("{position:03}.json"))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &PathBuf,
    ) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_json<T: serde::Serialize>(path: PathBuf, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(value)?).await?;
        Ok(())
    }
}

#[async_trait]
impl DeckStore for FileStore {
    async fn upsert_unit(&self, project: Uuid, unit: &RenderedUnit) -> Result<(), StoreError> {
        Self::write_json(self.unit_path(project, unit.position), unit).await
    }

    async fn fetch_unit(
        &self,
        project: Uuid,
        position: u32,
    ) -> Result<Option<RenderedUnit>, StoreError> {
        Self::read_json(&self.unit_path(project, position)).await
    }

    async fn get_outline(&self, project: Uuid) -> Result<Option<Outline>, StoreError> {
        Self::read_json(&self.project_dir(project).join("outline.json")).await
    }

    async fn save_outline(&self, project: Uuid, outline: &Outline) -> Result<(), StoreError> {
        Self::write_json(self.project_dir(project).join("outline.json"), outline).await
    }

    async fn manually_edited_positions(&self, project: Uuid) -> Result<Vec<u32>, StoreError> {
        Ok(
            Self::read_json::<Vec<u32>>(&self.project_dir(project).join("edited.json"))
                .await?
                .unwrap_or_default(),
        )
    }

    async fn mark_manually_edited(&self, project: Uuid, position: u32) -> Result<(), StoreError> {
        let mut positions = self.manually_edited_positions(project).await?;
        if !positions.contains(&position) {
            positions.push(position);
            positions.sort_unstable();
        }
        Self::write_json(self.project_dir(project).join("edited.json"), &positions).await
    }

    async fn get_style_guide(&self, project: Uuid) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.project_dir(project).join("style_guide.txt")).await {
            Ok(guide) => Ok(Some(guide)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put_style_guide(&self, project: Uuid, guide: &str) -> Result<(), StoreError> {
        let path = self.project_dir(project).join("style_guide.txt");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, guide).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::units::UnitSource;

    fn sample_unit(position: u32) -> RenderedUnit {
        RenderedUnit {
            position,
            markup: format!("<html><body>unit {position}</body></html>"),
            source: UnitSource::Generated,
        }
    }

    #[tokio::test]
    async fn memory_store_upsert_is_last_write_wins() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();

        store.upsert_unit(project, &sample_unit(1)).await.unwrap();
        let mut replacement = sample_unit(1);
        replacement.source = UnitSource::Fallback;
        store.upsert_unit(project, &replacement).await.unwrap();

        let fetched = store.fetch_unit(project, 1).await.unwrap().unwrap();
        assert_eq!(fetched.source, UnitSource::Fallback);
    }

    #[tokio::test]
    async fn file_store_round_trips_units_and_edits() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let project = Uuid::new_v4();

        store.upsert_unit(project, &sample_unit(2)).await.unwrap();
        store.mark_manually_edited(project, 2).await.unwrap();
        store.mark_manually_edited(project, 2).await.unwrap();
        store.put_style_guide(project, "dark, spacious").await.unwrap();

        assert_eq!(
            store.fetch_unit(project, 2).await.unwrap().unwrap(),
            sample_unit(2)
        );
        assert_eq!(store.manually_edited_positions(project).await.unwrap(), vec![2]);
        assert_eq!(
            store.get_style_guide(project).await.unwrap().as_deref(),
            Some("dark, spacious")
        );
        assert!(store.fetch_unit(project, 9).await.unwrap().is_none());
    }
}

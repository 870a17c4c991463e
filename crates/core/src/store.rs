//! Persistence for finished interviews.

use crate::model::{Difficulty, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access the interview store: {0}")]
    Io(#[from] std::io::Error),
    #[error("interview store is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no interview with id {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub role: String,
    pub difficulty: Difficulty,
    pub date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub score: u8,
    pub summary: String,
    pub turns: Vec<Turn>,
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSessionRecord {
    pub user_id: String,
    pub role: String,
    pub difficulty: Difficulty,
    pub date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub score: u8,
    pub summary: String,
    pub turns: Vec<Turn>,
}

impl NewSessionRecord {
    fn with_id(self, id: String) -> SessionRecord {
        SessionRecord {
            id,
            user_id: self.user_id,
            role: self.role,
            difficulty: self.difficulty,
            date: self.date,
            duration_minutes: self.duration_minutes,
            score: self.score,
            summary: self.summary,
            turns: self.turns,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores the record and returns its new id.
    async fn save(&self, record: NewSessionRecord) -> Result<String, StoreError>;

    /// Records of one user, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

fn newest_first(mut records: Vec<SessionRecord>, user_id: &str) -> Vec<SessionRecord> {
    records.retain(|r| r.user_id == user_id);
    records.sort_by(|a, b| b.date.cmp(&a.date));
    records
}

/// All records in a single JSON file. The file is created on first save.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<SessionRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, records: &[SessionRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn save(&self, record: NewSessionRecord) -> Result<String, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let id = uuid::Uuid::new_v4().to_string();
        records.push(record.with_id(id.clone()));
        self.persist(&records).await?;
        tracing::info!("Saved interview {} to {}", id, self.path.display());
        Ok(id)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(newest_first(self.load().await?, user_id))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.persist(&records).await?;
        tracing::info!("Deleted interview {}", id);
        Ok(())
    }
}

/// In-memory store, useful for tests and `--no-save` runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SessionRecord>>,
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, record: NewSessionRecord) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.records.lock().push(record.with_id(id.clone()));
        Ok(id)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(newest_first(self.records.lock().clone(), user_id))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Feedback;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn record(user: &str, role: &str, day: u32) -> NewSessionRecord {
        NewSessionRecord {
            user_id: user.to_string(),
            role: role.to_string(),
            difficulty: Difficulty::Medium,
            date: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            duration_minutes: 12,
            score: 70,
            summary: "Solid.".to_string(),
            turns: vec![
                Turn::answered("Q1", "A1", Feedback::Freeform { text: "ok".into() }),
                Turn::skipped("Q2"),
            ],
        }
    }

    #[tokio::test]
    async fn test_json_store_round_trips_and_sorts_newest_first() {
        // Arrange
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("interviews.json"));

        // Act
        let older = store.save(record("u1", "SRE", 1)).await.unwrap();
        let newer = store.save(record("u1", "Backend Engineer", 9)).await.unwrap();
        store.save(record("u2", "SRE", 5)).await.unwrap();

        // Assert: a fresh store over the same file sees the same data
        let reopened = JsonFileStore::new(dir.path().join("nested").join("interviews.json"));
        let records = reopened.list("u1").await.unwrap();
        assert_eq!(
            records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec![newer.as_str(), older.as_str()]
        );
        assert_eq!(records[1].turns[1], Turn::skipped("Q2"));
    }

    #[tokio::test]
    async fn test_json_store_delete() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("interviews.json"));
        let id = store.save(record("u1", "SRE", 1)).await.unwrap();

        store.delete(&id).await.unwrap();

        assert!(store.list("u1").await.unwrap().is_empty());
        assert!(matches!(store.delete(&id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_json_store_reports_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("interviews.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = JsonFileStore::new(path).list("u1").await;

        assert!(matches!(result, Err(StoreError::Serde(_))));
    }

    #[tokio::test]
    async fn test_memory_store_filters_by_user() {
        let store = MemoryStore::default();
        store.save(record("u1", "SRE", 2)).await.unwrap();
        store.save(record("u2", "SRE", 3)).await.unwrap();

        assert_eq!(store.list("u1").await.unwrap().len(), 1);
        assert!(store.list("nobody").await.unwrap().is_empty());
    }
}

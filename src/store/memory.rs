//! In-process counter store.
//!
//! Backs the console binary and the tests. Increments are applied under a
//! single lock, which gives the same additive semantics a real backend's
//! atomic increment provides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ContentType, OwnerId, TrackingKey};
use crate::utils::lock_or_recover;

use super::CounterStore;

type RowKey = (OwnerId, ContentType, String);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRow {
    pub total_seconds: u64,
    pub chapter_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One accepted `increment` call, in arrival order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementCall {
    pub owner: OwnerId,
    pub key: TrackingKey,
    pub delta_seconds: u64,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    rows: HashMap<RowKey, CounterRow>,
    increments: Vec<IncrementCall>,
    single_reads: usize,
    batch_reads: usize,
    unavailable: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        lock_or_recover(&self.inner)
    }

    /// Writes an absolute total, bypassing the increment log. Setup only.
    pub fn seed(&self, owner: &OwnerId, key: &TrackingKey, total_seconds: u64) {
        let row = CounterRow {
            total_seconds,
            chapter_id: key.chapter_id.clone(),
            updated_at: Utc::now(),
        };
        self.lock().rows.insert(
            (owner.clone(), key.content_type, key.content_id.clone()),
            row,
        );
    }

    pub fn total(&self, owner: &OwnerId, content_type: ContentType, content_id: &str) -> Option<u64> {
        self.row(owner, content_type, content_id)
            .map(|row| row.total_seconds)
    }

    pub fn row(&self, owner: &OwnerId, content_type: ContentType, content_id: &str) -> Option<CounterRow> {
        self.lock()
            .rows
            .get(&(owner.clone(), content_type, content_id.to_string()))
            .cloned()
    }

    pub fn increments(&self) -> Vec<IncrementCall> {
        self.lock().increments.clone()
    }

    pub fn increment_deltas(&self) -> Vec<u64> {
        self.lock()
            .increments
            .iter()
            .map(|call| call.delta_seconds)
            .collect()
    }

    /// Number of `read_total` calls served or refused.
    pub fn single_reads(&self) -> usize {
        self.lock().single_reads
    }

    pub fn batch_reads(&self) -> usize {
        self.lock().batch_reads
    }

    /// Makes every call fail until switched back, simulating an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }
}

impl CounterStore for MemoryStore {
    async fn read_total(
        &self,
        owner: &OwnerId,
        content_type: ContentType,
        content_id: &str,
    ) -> Result<Option<u64>> {
        let mut inner = self.lock();
        inner.single_reads += 1;
        if inner.unavailable {
            bail!("counter store unavailable");
        }
        Ok(inner
            .rows
            .get(&(owner.clone(), content_type, content_id.to_string()))
            .map(|row| row.total_seconds))
    }

    async fn increment(&self, owner: &OwnerId, key: &TrackingKey, delta_seconds: u64) -> Result<()> {
        if delta_seconds == 0 {
            bail!("increment delta must be positive");
        }

        let mut inner = self.lock();
        if inner.unavailable {
            bail!("counter store unavailable");
        }

        let now = Utc::now();
        let row = inner
            .rows
            .entry((owner.clone(), key.content_type, key.content_id.clone()))
            .or_insert_with(|| CounterRow {
                total_seconds: 0,
                chapter_id: key.chapter_id.clone(),
                updated_at: now,
            });
        row.total_seconds = row.total_seconds.saturating_add(delta_seconds);
        if row.chapter_id.is_none() {
            row.chapter_id = key.chapter_id.clone();
        }
        row.updated_at = now;

        inner.increments.push(IncrementCall {
            owner: owner.clone(),
            key: key.clone(),
            delta_seconds,
            received_at: now,
        });
        Ok(())
    }

    async fn read_totals(
        &self,
        owner: &OwnerId,
        content_type: ContentType,
        content_ids: &[String],
    ) -> Result<HashMap<String, u64>> {
        let mut inner = self.lock();
        inner.batch_reads += 1;
        if inner.unavailable {
            bail!("counter store unavailable");
        }

        let totals = content_ids
            .iter()
            .filter_map(|id| {
                inner
                    .rows
                    .get(&(owner.clone(), content_type, id.clone()))
                    .map(|row| (id.clone(), row.total_seconds))
            })
            .collect();
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("learner-1")
    }

    #[tokio::test]
    async fn increments_are_additive_and_create_rows() {
        let store = MemoryStore::new();
        let key = TrackingKey::quiz("q1").with_chapter("c1");

        assert_eq!(store.read_total(&owner(), ContentType::Quiz, "q1").await.unwrap(), None);

        store.increment(&owner(), &key, 30).await.unwrap();
        store.increment(&owner(), &key, 12).await.unwrap();

        assert_eq!(store.read_total(&owner(), ContentType::Quiz, "q1").await.unwrap(), Some(42));
        assert_eq!(store.increment_deltas(), vec![30, 12]);
        let row = store.row(&owner(), ContentType::Quiz, "q1").unwrap();
        assert_eq!(row.chapter_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn zero_delta_is_rejected() {
        let store = MemoryStore::new();
        let key = TrackingKey::chapter("c1");
        assert!(store.increment(&owner(), &key, 0).await.is_err());
        assert!(store.increments().is_empty());
    }

    #[tokio::test]
    async fn rows_are_scoped_by_owner_and_type() {
        let store = MemoryStore::new();
        store.seed(&owner(), &TrackingKey::chapter("x"), 10);
        store.seed(&OwnerId::new("other"), &TrackingKey::chapter("x"), 99);

        assert_eq!(store.total(&owner(), ContentType::Chapter, "x"), Some(10));
        assert_eq!(store.total(&owner(), ContentType::Quiz, "x"), None);
    }

    #[tokio::test]
    async fn batch_read_omits_missing_ids() {
        let store = MemoryStore::new();
        store.seed(&owner(), &TrackingKey::chapter("a"), 5);
        let ids = vec!["a".to_string(), "b".to_string()];

        let totals = store.read_totals(&owner(), ContentType::Chapter, &ids).await.unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals.get("a"), Some(&5));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let key = TrackingKey::chapter("a");

        assert!(store.read_total(&owner(), ContentType::Chapter, "a").await.is_err());
        assert!(store.increment(&owner(), &key, 3).await.is_err());
        assert!(store.read_totals(&owner(), ContentType::Chapter, &[]).await.is_err());
        assert!(store.increments().is_empty());

        store.set_unavailable(false);
        store.increment(&owner(), &key, 3).await.unwrap();
        assert_eq!(store.total(&owner(), ContentType::Chapter, "a"), Some(3));
    }
}

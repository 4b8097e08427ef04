use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::curve::trainer::VolumeSummary;
use crate::models::curve::{CurveModelRow, VolumeObservation};
use crate::store::{CurveStore, CurveTx, StoreError};

/// Process-local store used when no database is configured.
///
/// A transaction holds the store lock for its whole lifetime and writes to a
/// working copy, which replaces the shared state only on commit.
#[derive(Clone, Default)]
pub struct MemoryCurveStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Clone, Default)]
struct MemoryState {
    volumes: BTreeMap<(String, String), VolumeObservation>,
    model: Option<CurveModelRow>,
    next_id: i64,
}

pub struct MemoryCurveTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryCurveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CurveStore for MemoryCurveStore {
    async fn begin(&self) -> Result<Box<dyn CurveTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryCurveTx { guard, working }))
    }
}

#[async_trait]
impl CurveTx for MemoryCurveTx {
    async fn find_volume(
        &mut self,
        keyword: &str,
        month: &str,
    ) -> Result<Option<VolumeObservation>, StoreError> {
        Ok(self
            .working
            .volumes
            .get(&(keyword.to_string(), month.to_string()))
            .cloned())
    }

    async fn latest_volume(
        &mut self,
        keyword: &str,
    ) -> Result<Option<VolumeObservation>, StoreError> {
        Ok(self
            .working
            .volumes
            .values()
            .filter(|obs| obs.keyword == keyword)
            .max_by(|a, b| a.month.cmp(&b.month))
            .cloned())
    }

    async fn insert_volume(
        &mut self,
        keyword: &str,
        month: &str,
        volume_total: i64,
        created_at: DateTime<Utc>,
    ) -> Result<VolumeObservation, StoreError> {
        let state = &mut self.working;
        let key = (keyword.to_string(), month.to_string());
        if let Some(existing) = state.volumes.get(&key) {
            return Ok(existing.clone());
        }
        state.next_id += 1;
        let row = VolumeObservation {
            id: state.next_id,
            keyword: keyword.to_string(),
            month: month.to_string(),
            volume_total,
            created_at,
        };
        state.volumes.insert(key, row.clone());
        Ok(row)
    }

    async fn volume_summary(&mut self) -> Result<VolumeSummary, StoreError> {
        let totals: Vec<i64> = self
            .working
            .volumes
            .values()
            .map(|obs| obs.volume_total)
            .collect();
        Ok(VolumeSummary::from_totals(&totals))
    }

    async fn load_model(&mut self) -> Result<Option<CurveModelRow>, StoreError> {
        Ok(self.working.model.clone())
    }

    async fn store_model(
        &mut self,
        params: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.working.model = Some(CurveModelRow {
            params: params.clone(),
            updated_at,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryCurveTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
impl MemoryCurveStore {
    pub async fn volume_count(&self) -> usize {
        self.state.lock().await.volumes.len()
    }

    pub async fn observation(&self, keyword: &str, month: &str) -> Option<VolumeObservation> {
        self.state
            .lock()
            .await
            .volumes
            .get(&(keyword.to_string(), month.to_string()))
            .cloned()
    }

    pub async fn model(&self) -> Option<CurveModelRow> {
        self.state.lock().await.model.clone()
    }

    pub async fn put_volume(&self, keyword: &str, month: &str, volume_total: i64) {
        let mut tx = self.begin().await.unwrap();
        tx.insert_volume(keyword, month, volume_total, Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn put_model(&self, params: serde_json::Value, updated_at: DateTime<Utc>) {
        self.state.lock().await.model = Some(CurveModelRow { params, updated_at });
    }
}

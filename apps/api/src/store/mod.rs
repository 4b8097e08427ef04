//! Persistence for the volume cache and the singleton curve model.
//!
//! Every engine call works inside one `CurveTx`. Dropping a transaction without
//! calling `commit` discards all of its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::curve::trainer::VolumeSummary;
use crate::models::curve::{CurveModelRow, VolumeObservation};

pub mod memory;
pub mod postgres;

pub use memory::MemoryCurveStore;
pub use postgres::PgCurveStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("write conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait CurveStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CurveTx>, StoreError>;
}

#[async_trait]
pub trait CurveTx: Send {
    async fn find_volume(
        &mut self,
        keyword: &str,
        month: &str,
    ) -> Result<Option<VolumeObservation>, StoreError>;

    /// Most recent observation for a keyword across all months.
    async fn latest_volume(&mut self, keyword: &str)
        -> Result<Option<VolumeObservation>, StoreError>;

    /// Insert-or-get on `(keyword, month)`. An existing row wins and is returned unchanged.
    async fn insert_volume(
        &mut self,
        keyword: &str,
        month: &str,
        volume_total: i64,
        created_at: DateTime<Utc>,
    ) -> Result<VolumeObservation, StoreError>;

    /// Count and mean of every stored total, aggregated in the store.
    async fn volume_summary(&mut self) -> Result<VolumeSummary, StoreError>;

    async fn load_model(&mut self) -> Result<Option<CurveModelRow>, StoreError>;

    /// Creates or overwrites the singleton model row.
    async fn store_model(
        &mut self,
        params: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::curve::trainer::VolumeSummary;
use crate::models::curve::{CurveModelRow, VolumeObservation};
use crate::store::{CurveStore, CurveTx, StoreError};

/// Advisory lock key taken by every curve transaction, serializing writers of the
/// singleton model and the volume cache.
const CURVE_LOCK_KEY: i64 = 0x6375_7276_65;

#[derive(Clone)]
pub struct PgCurveStore {
    pool: PgPool,
}

impl PgCurveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgCurveTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CurveStore for PgCurveStore {
    async fn begin(&self) -> Result<Box<dyn CurveTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CURVE_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgCurveTx { tx }))
    }
}

#[async_trait]
impl CurveTx for PgCurveTx {
    async fn find_volume(
        &mut self,
        keyword: &str,
        month: &str,
    ) -> Result<Option<VolumeObservation>, StoreError> {
        Ok(sqlx::query_as::<_, VolumeObservation>(
            "SELECT * FROM keyword_volumes WHERE keyword = $1 AND month = $2",
        )
        .bind(keyword)
        .bind(month)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn latest_volume(
        &mut self,
        keyword: &str,
    ) -> Result<Option<VolumeObservation>, StoreError> {
        Ok(sqlx::query_as::<_, VolumeObservation>(
            "SELECT * FROM keyword_volumes WHERE keyword = $1 ORDER BY month DESC LIMIT 1",
        )
        .bind(keyword)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn insert_volume(
        &mut self,
        keyword: &str,
        month: &str,
        volume_total: i64,
        created_at: DateTime<Utc>,
    ) -> Result<VolumeObservation, StoreError> {
        let inserted: Option<VolumeObservation> = sqlx::query_as(
            r#"
            INSERT INTO keyword_volumes (keyword, month, volume_total, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (keyword, month) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(keyword)
        .bind(month)
        .bind(volume_total)
        .bind(created_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        // Lost the insert to an existing row; that row is authoritative.
        self.find_volume(keyword, month).await?.ok_or_else(|| {
            StoreError::Conflict(format!(
                "keyword_volumes ({keyword}, {month}) conflicted but is not visible"
            ))
        })
    }

    async fn volume_summary(&mut self) -> Result<VolumeSummary, StoreError> {
        let (count, mean): (i64, f64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(AVG(volume_total)::float8, 0) FROM keyword_volumes",
        )
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(VolumeSummary { count, mean })
    }

    async fn load_model(&mut self) -> Result<Option<CurveModelRow>, StoreError> {
        Ok(sqlx::query_as::<_, CurveModelRow>(
            "SELECT params, updated_at FROM curve_model WHERE id = 1",
        )
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn store_model(
        &mut self,
        params: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO curve_model (id, params, updated_at)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE
                SET params = EXCLUDED.params,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(params)
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

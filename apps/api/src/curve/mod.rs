//! Rank Prediction Curve Engine.
//!
//! Maps a keyword's monthly search volume to an expected search-result rank
//! through a logistic curve fitted over every cached volume observation.
//! Each engine call runs inside a single store transaction: either all of its
//! cache and model writes land, or none do.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::curve::VolumeObservation;
use crate::store::{CurveStore, CurveTx, StoreError};
use crate::volume::{MonthlyVolume, SourceError, VolumeSource};

pub mod clock;
pub mod handlers;
pub mod predictor;
pub mod trainer;

use clock::{month_key, store_precision, Clock};
use predictor::{predict_rank, Rank};
use trainer::{train, CurveParams};

/// Seed volumes loaded at startup when `SEED_SAMPLE_VOLUMES` is enabled.
pub const SAMPLE_VOLUMES: &[(&str, i64)] = &[("환절기 아토피", 12_800), ("아토피 보습", 8_200)];

#[derive(Debug, Error)]
pub enum CurveError {
    #[error("volume source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("curve model corrupt: {0}")]
    ModelCorrupt(String),
}

/// Decoded snapshot of the singleton model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveModel {
    pub params: CurveParams,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurvePrediction {
    pub updated_at: DateTime<Utc>,
    pub params: CurveParams,
    pub predictions: BTreeMap<String, Rank>,
}

pub struct CurveEngine {
    store: Arc<dyn CurveStore>,
    source: Arc<dyn VolumeSource>,
    clock: Arc<dyn Clock>,
}

impl CurveEngine {
    pub fn new(
        store: Arc<dyn CurveStore>,
        source: Arc<dyn VolumeSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            clock,
        }
    }

    /// Loads (or trains) the current model once, then predicts a rank for every
    /// keyword from its cached monthly volume.
    pub async fn refresh_and_predict(
        &self,
        keywords: &[String],
        force_refresh: bool,
    ) -> Result<CurvePrediction, CurveError> {
        let fetched = self.fetch_volumes(keywords).await;

        let mut tx = self.store.begin().await?;
        let model = self.current_model(tx.as_mut(), force_refresh).await?;

        let mut predictions = BTreeMap::new();
        for (keyword, volume) in fetched {
            let observation = self.observe(tx.as_mut(), &keyword, volume).await?;
            let rank = predict_rank(observation.volume_total, &model.params);
            debug!(
                "Predicted rank {} for '{}' (volume {})",
                rank, keyword, observation.volume_total
            );
            predictions.insert(keyword, rank);
        }

        tx.commit().await?;

        Ok(CurvePrediction {
            updated_at: model.updated_at,
            params: model.params,
            predictions,
        })
    }

    /// Cached monthly volumes, writing through on first lookup in a month.
    pub async fn volumes(
        &self,
        keywords: &[String],
    ) -> Result<BTreeMap<String, MonthlyVolume>, CurveError> {
        let fetched = self.fetch_volumes(keywords).await;

        let mut tx = self.store.begin().await?;

        let mut volumes = BTreeMap::new();
        for (keyword, volume) in fetched {
            let observation = self.observe(tx.as_mut(), &keyword, volume).await?;
            volumes.insert(
                keyword,
                MonthlyVolume {
                    month: observation.month,
                    total: observation.volume_total,
                },
            );
        }

        tx.commit().await?;
        Ok(volumes)
    }

    /// Inserts a current-month observation for each seed keyword that has never
    /// been observed. Returns how many rows were added.
    pub async fn seed_volumes(&self, seeds: &[(&str, i64)]) -> Result<usize, CurveError> {
        let now = self.clock.now();
        let month = month_key(now);
        let mut tx = self.store.begin().await?;

        let mut inserted = 0;
        for &(keyword, total) in seeds {
            if tx.latest_volume(keyword).await?.is_some() {
                continue;
            }
            tx.insert_volume(keyword, &month, total, store_precision(now))
                .await?;
            inserted += 1;
        }

        tx.commit().await?;
        if inserted > 0 {
            info!("Seeded {inserted} keyword volume(s) for {month}");
        }
        Ok(inserted)
    }

    async fn current_model(
        &self,
        tx: &mut dyn CurveTx,
        force_refresh: bool,
    ) -> Result<CurveModel, CurveError> {
        let stored = tx.load_model().await?;
        let previous_updated_at = stored.as_ref().map(|row| row.updated_at);

        let existing = match stored {
            Some(row) => match CurveParams::from_blob(&row.params) {
                Ok(params) => Some(CurveModel {
                    params,
                    updated_at: row.updated_at,
                }),
                Err(e) => {
                    warn!("Stored curve model unusable, retraining: {e}");
                    None
                }
            },
            None => None,
        };

        if let Some(model) = existing {
            if !force_refresh {
                return Ok(model);
            }
        }

        let summary = tx.volume_summary().await?;
        let params = train(&summary);
        let updated_at = next_updated_at(store_precision(self.clock.now()), previous_updated_at);
        tx.store_model(&params.to_blob(), updated_at).await?;

        info!(
            "Trained rank curve over {} observation(s): pivot={:.2} steepness={} scale={}",
            summary.count,
            params.pivot,
            params.steepness,
            params.scale
        );

        Ok(CurveModel { params, updated_at })
    }

    /// Queries the source for every keyword before any transaction is opened,
    /// so slow lookups never hold the store lock. Failures are kept per keyword
    /// for the cache fallback.
    async fn fetch_volumes(
        &self,
        keywords: &[String],
    ) -> Vec<(String, Result<MonthlyVolume, SourceError>)> {
        let mut fetched = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let volume = self.source.monthly_search_volume(keyword).await;
            fetched.push((keyword.clone(), volume));
        }
        fetched
    }

    /// Volume Cache lookup. The fetched month picks the bucket; an existing row
    /// for that month is authoritative.
    async fn observe(
        &self,
        tx: &mut dyn CurveTx,
        keyword: &str,
        fetched: Result<MonthlyVolume, SourceError>,
    ) -> Result<VolumeObservation, CurveError> {
        let fetched = match fetched {
            Ok(v) => v,
            Err(e) => return self.fallback(tx, keyword, e).await,
        };

        if let Some(cached) = tx.find_volume(keyword, &fetched.month).await? {
            debug!("Volume cache hit for '{}' in {}", keyword, cached.month);
            return Ok(cached);
        }

        debug!("Volume cache miss for '{}' in {}", keyword, fetched.month);
        let created_at = store_precision(self.clock.now());
        Ok(tx
            .insert_volume(keyword, &fetched.month, fetched.total, created_at)
            .await?)
    }

    /// On source failure, serve this month's cached observation if there is one.
    async fn fallback(
        &self,
        tx: &mut dyn CurveTx,
        keyword: &str,
        err: SourceError,
    ) -> Result<VolumeObservation, CurveError> {
        let month = month_key(self.clock.now());
        match tx.find_volume(keyword, &month).await? {
            Some(cached) => {
                warn!("Volume source failed for '{keyword}', using cached {month} volume: {err}");
                Ok(cached)
            }
            None => Err(CurveError::SourceUnavailable(err)),
        }
    }
}

/// Refresh timestamps strictly increase, even if the clock has not moved.
fn next_updated_at(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::clock::testing::FixedClock;
    use crate::store::testing::RejectingStore;
    use crate::store::MemoryCurveStore;
    use crate::volume::HashedVolumeSource;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    const NOW: &str = "2026-10-16T09:00:00Z";

    struct Harness {
        store: MemoryCurveStore,
        clock: Arc<FixedClock>,
        engine: CurveEngine,
    }

    fn harness() -> Harness {
        let store = MemoryCurveStore::new();
        let clock = Arc::new(FixedClock::at(NOW));
        let source = Arc::new(HashedVolumeSource::new(clock.clone()));
        let engine = CurveEngine::new(Arc::new(store.clone()), source, clock.clone());
        Harness {
            store,
            clock,
            engine,
        }
    }

    /// Source that always fails, as a real API would when unreachable.
    struct DownSource;

    #[async_trait]
    impl VolumeSource for DownSource {
        async fn monthly_search_volume(&self, _: &str) -> Result<MonthlyVolume, SourceError> {
            Err(SourceError::Api {
                status: 503,
                message: "maintenance".to_string(),
            })
        }
    }

    /// Source that reports a fixed total, to observe cache authority.
    struct FixedSource(i64);

    #[async_trait]
    impl VolumeSource for FixedSource {
        async fn monthly_search_volume(&self, _: &str) -> Result<MonthlyVolume, SourceError> {
            Ok(MonthlyVolume {
                month: "2026-10".to_string(),
                total: self.0,
            })
        }
    }

    /// Source that blocks inside the lookup until released.
    #[derive(Default)]
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl VolumeSource for GatedSource {
        async fn monthly_search_volume(&self, _: &str) -> Result<MonthlyVolume, SourceError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(MonthlyVolume {
                month: "2026-10".to_string(),
                total: 7000,
            })
        }
    }

    fn kws(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_call_trains_default_model() {
        let h = harness();
        let result = h.engine.refresh_and_predict(&[], false).await.unwrap();

        assert_eq!(result.params, CurveParams::default());
        assert!(result.predictions.is_empty());
        assert!(h.store.model().await.is_some());
    }

    #[tokio::test]
    async fn test_default_model_predicts_midpoint() {
        let h = harness();
        h.store.put_model(CurveParams::default().to_blob(), h.clock.now()).await;
        let engine = CurveEngine::new(
            Arc::new(h.store.clone()),
            Arc::new(FixedSource(5000)),
            h.clock.clone(),
        );

        let result = engine.refresh_and_predict(&kws(&["mid"]), false).await.unwrap();
        assert_eq!(result.predictions["mid"], Rank::Position(451));
    }

    #[tokio::test]
    async fn test_trained_pivot_is_mean_of_cache() {
        let h = harness();
        h.store.put_volume("a", "2026-09", 4000).await;
        h.store.put_volume("b", "2026-09", 6000).await;

        let result = h.engine.refresh_and_predict(&[], true).await.unwrap();
        assert_eq!(
            result.params,
            CurveParams {
                pivot: 5000.0,
                steepness: 0.002,
                scale: 800.0
            }
        );
    }

    #[tokio::test]
    async fn test_model_trained_before_new_keywords_are_cached() {
        let h = harness();
        let result = h.engine.refresh_and_predict(&kws(&["fresh"]), false).await.unwrap();

        // No observations existed when the model was trained.
        assert_eq!(result.params, CurveParams::default());
        assert_eq!(h.store.volume_count().await, 1);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_deterministic_and_deduplicated() {
        let h = harness();
        let first = h.engine.refresh_and_predict(&kws(&["x", "y"]), false).await.unwrap();
        h.clock.advance(Duration::days(3));
        let second = h.engine.refresh_and_predict(&kws(&["x", "y"]), false).await.unwrap();

        assert_eq!(first.predictions, second.predictions);
        assert_eq!(h.store.volume_count().await, 2);

        let x = h.store.observation("x", "2026-10").await.unwrap();
        let volumes = h.engine.volumes(&kws(&["x"])).await.unwrap();
        assert_eq!(volumes["x"].total, x.volume_total);
        assert_eq!(volumes["x"].month, "2026-10");
    }

    #[tokio::test]
    async fn test_cached_total_wins_over_fresh_fetch() {
        let h = harness();
        h.store.put_volume("x", "2026-10", 1234).await;
        let engine = CurveEngine::new(
            Arc::new(h.store.clone()),
            Arc::new(FixedSource(9999)),
            h.clock.clone(),
        );

        let volumes = engine.volumes(&kws(&["x"])).await.unwrap();
        assert_eq!(volumes["x"].total, 1234);
    }

    #[tokio::test]
    async fn test_new_month_adds_new_observation() {
        let h = harness();
        h.engine.volumes(&kws(&["x"])).await.unwrap();
        h.clock.advance(Duration::days(20));
        h.engine.volumes(&kws(&["x"])).await.unwrap();

        assert_eq!(h.store.volume_count().await, 2);
        assert!(h.store.observation("x", "2026-11").await.is_some());
    }

    #[tokio::test]
    async fn test_no_refresh_keeps_timestamp() {
        let h = harness();
        let first = h.engine.refresh_and_predict(&[], false).await.unwrap();
        h.clock.advance(Duration::days(400));
        let second = h.engine.refresh_and_predict(&kws(&["x"]), false).await.unwrap();

        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(first.params, second.params);
    }

    #[tokio::test]
    async fn test_forced_refresh_advances_timestamp() {
        let h = harness();
        let first = h.engine.refresh_and_predict(&[], true).await.unwrap();
        h.clock.advance(Duration::seconds(5));
        let second = h.engine.refresh_and_predict(&[], true).await.unwrap();

        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.updated_at, h.clock.now());
    }

    #[tokio::test]
    async fn test_forced_refresh_advances_with_frozen_clock() {
        let h = harness();
        let first = h.engine.refresh_and_predict(&[], true).await.unwrap();
        let second = h.engine.refresh_and_predict(&[], true).await.unwrap();
        let third = h.engine.refresh_and_predict(&[], true).await.unwrap();

        assert!(first.updated_at < second.updated_at);
        assert!(second.updated_at < third.updated_at);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_observations() {
        let h = harness();
        h.engine.refresh_and_predict(&kws(&["x"]), false).await.unwrap();
        let refreshed = h.engine.refresh_and_predict(&[], true).await.unwrap();

        let x = h.store.observation("x", "2026-10").await.unwrap();
        assert_eq!(refreshed.params.pivot, x.volume_total as f64);
        assert_eq!(refreshed.params.scale, 800.0);
    }

    #[tokio::test]
    async fn test_corrupt_model_is_retrained() {
        let h = harness();
        let stale = h.clock.now() - Duration::days(1);
        h.store.put_model(json!({"pivot": "oops"}), stale).await;

        let result = h.engine.refresh_and_predict(&[], false).await.unwrap();
        assert_eq!(result.params, CurveParams::default());
        assert!(result.updated_at > stale);

        let stored = h.store.model().await.unwrap();
        assert_eq!(
            CurveParams::from_blob(&stored.params).unwrap(),
            CurveParams::default()
        );
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_everything() {
        let h = harness();
        let engine = CurveEngine::new(
            Arc::new(RejectingStore(h.store.clone())),
            Arc::new(HashedVolumeSource::new(h.clock.clone())),
            h.clock.clone(),
        );

        let err = engine
            .refresh_and_predict(&kws(&["x", "y"]), false)
            .await
            .unwrap_err();

        assert!(matches!(err, CurveError::Store(StoreError::Conflict(_))));
        assert_eq!(h.store.volume_count().await, 0);
        assert!(h.store.model().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_source_does_not_hold_store() {
        let h = harness();
        let source = Arc::new(GatedSource::default());
        let engine = Arc::new(CurveEngine::new(
            Arc::new(h.store.clone()),
            source.clone(),
            h.clock.clone(),
        ));

        let slow = tokio::spawn({
            let engine = engine.clone();
            async move { engine.refresh_and_predict(&kws(&["a"]), false).await }
        });
        source.entered.notified().await;

        // The first call is parked in the source; the store must still be free.
        let other = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            engine.refresh_and_predict(&[], false),
        )
        .await
        .expect("store was held across the volume lookup")
        .unwrap();
        assert_eq!(other.params, CurveParams::default());

        source.release.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.predictions.len(), 1);
        assert_eq!(h.store.observation("a", "2026-10").await.unwrap().volume_total, 7000);
    }

    #[tokio::test]
    async fn test_source_failure_uses_cached_month() {
        let h = harness();
        h.store.put_volume("x", "2026-10", 4321).await;
        let engine = CurveEngine::new(Arc::new(h.store.clone()), Arc::new(DownSource), h.clock.clone());

        let volumes = engine.volumes(&kws(&["x"])).await.unwrap();
        assert_eq!(volumes["x"].total, 4321);
    }

    #[tokio::test]
    async fn test_source_failure_without_cache_fails_whole_call() {
        let h = harness();
        h.store.put_volume("x", "2026-10", 4321).await;
        let engine = CurveEngine::new(Arc::new(h.store.clone()), Arc::new(DownSource), h.clock.clone());

        let err = engine
            .refresh_and_predict(&kws(&["x", "unseen"]), false)
            .await
            .unwrap_err();

        assert!(matches!(err, CurveError::SourceUnavailable(_)));
        // The model trained inside the failed call was rolled back too.
        assert!(h.store.model().await.is_none());
    }

    #[tokio::test]
    async fn test_stale_month_is_not_a_fallback() {
        let h = harness();
        h.store.put_volume("x", "2026-09", 4321).await;
        let engine = CurveEngine::new(Arc::new(h.store.clone()), Arc::new(DownSource), h.clock.clone());

        assert!(engine.volumes(&kws(&["x"])).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_skips_known_keywords() {
        let h = harness();
        h.store.put_volume("아토피 보습", "2026-01", 100).await;

        let inserted = h.engine.seed_volumes(SAMPLE_VOLUMES).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(
            h.store.observation("환절기 아토피", "2026-10").await.unwrap().volume_total,
            12_800
        );
        assert!(h.store.observation("아토피 보습", "2026-10").await.is_none());

        assert_eq!(h.engine.seed_volumes(SAMPLE_VOLUMES).await.unwrap(), 0);
    }

    #[test]
    fn test_next_updated_at() {
        let t = DateTime::parse_from_rfc3339(NOW).unwrap().with_timezone(&Utc);
        assert_eq!(next_updated_at(t, None), t);
        assert_eq!(next_updated_at(t, Some(t - Duration::seconds(1))), t);
        assert_eq!(next_updated_at(t, Some(t)), t + Duration::microseconds(1));
    }
}

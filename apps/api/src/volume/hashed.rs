use std::sync::Arc;

use async_trait::async_trait;

use crate::curve::clock::{month_key, Clock};
use crate::volume::{MonthlyVolume, SourceError, VolumeSource};

const BASE_VOLUME: u64 = 3000;
const VOLUME_SPREAD: u64 = 7000;

/// Offline volume estimator. The total is a pure function of the keyword hash,
/// so every lookup in the same month agrees without any network access.
pub struct HashedVolumeSource {
    clock: Arc<dyn Clock>,
}

impl HashedVolumeSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// `3000 + (h mod 7000)` where `h` is the leading 8 bytes of the BLAKE3 digest.
pub fn hashed_total(keyword: &str) -> i64 {
    let digest = blake3::hash(keyword.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    (BASE_VOLUME + u64::from_le_bytes(head) % VOLUME_SPREAD) as i64
}

#[async_trait]
impl VolumeSource for HashedVolumeSource {
    async fn monthly_search_volume(&self, keyword: &str) -> Result<MonthlyVolume, SourceError> {
        Ok(MonthlyVolume {
            month: month_key(self.clock.now()),
            total: hashed_total(keyword),
        })
    }
}

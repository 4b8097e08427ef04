//! Volume Source: monthly search-volume estimates for a keyword.
//!
//! Default: `HashedVolumeSource` (offline, deterministic within a month).
//! `HttpVolumeSource` takes over when `VOLUME_API_URL` is configured.
//!
//! `CurveEngine` holds an `Arc<dyn VolumeSource>`, chosen once at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod hashed;
pub mod http;

pub use hashed::HashedVolumeSource;
pub use http::HttpVolumeSource;

/// A month's total search volume for one keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyVolume {
    pub month: String,
    pub total: i64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid volume response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait VolumeSource: Send + Sync {
    async fn monthly_search_volume(&self, keyword: &str) -> Result<MonthlyVolume, SourceError>;
}

/// Checks a `YYYY-MM` month label.
pub fn is_valid_month(month: &str) -> bool {
    let Some((year, mon)) = month.split_once('-') else {
        return false;
    };
    year.len() == 4
        && mon.len() == 2
        && year.bytes().chain(mon.bytes()).all(|b| b.is_ascii_digit())
        && matches!(mon.parse::<u8>(), Ok(1..=12))
}

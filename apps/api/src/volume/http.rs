//! Network-backed volume source.
//!
//! Speaks a minimal JSON contract: `GET {base}/monthly-volume?keyword=..` answering
//! `{"month": "YYYY-MM", "total": <non-negative int>}`. Retries on 429 and 5xx
//! with exponential backoff; every other failure is returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::volume::{is_valid_month, MonthlyVolume, SourceError, VolumeSource};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct HttpVolumeSource {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    backoff_base: Duration,
}

impl HttpVolumeSource {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            endpoint: format!("{}/monthly-volume", base_url.trim_end_matches('/')),
            api_key,
            backoff_base: BACKOFF_BASE,
        }
    }

    #[cfg(test)]
    fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn fetch_once(&self, keyword: &str) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.get(&self.endpoint).query(&[("keyword", keyword)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request.send().await
    }
}

#[async_trait]
impl VolumeSource for HttpVolumeSource {
    async fn monthly_search_volume(&self, keyword: &str) -> Result<MonthlyVolume, SourceError> {
        let mut last_error: Option<SourceError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(self.backoff_base, attempt);
                warn!(
                    "Volume lookup attempt {} for '{}' failed, retrying after {}ms...",
                    attempt,
                    keyword,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.fetch_once(keyword).await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(SourceError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Volume API returned {}: {}", status, body);
                last_error = Some(SourceError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(SourceError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let volume: MonthlyVolume = response.json().await?;
            let volume = check_volume(volume)?;
            debug!(
                "Volume API: '{}' -> {} in {}",
                keyword, volume.total, volume.month
            );
            return Ok(volume);
        }

        Err(last_error.unwrap_or(SourceError::Api {
            status: 429,
            message: format!("gave up after {MAX_RETRIES} attempts"),
        }))
    }
}

/// Delay before retry `attempt` (1-based): `base`, `2 * base`, ...
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * (1 << (attempt - 1))
}

fn check_volume(volume: MonthlyVolume) -> Result<MonthlyVolume, SourceError> {
    if !is_valid_month(&volume.month) {
        return Err(SourceError::InvalidResponse(format!(
            "month '{}' is not YYYY-MM",
            volume.month
        )));
    }
    if volume.total < 0 {
        return Err(SourceError::InvalidResponse(format!(
            "negative total {}",
            volume.total
        )));
    }
    Ok(volume)
}

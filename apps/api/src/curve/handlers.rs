//! Axum route handlers for the Curve API.

use std::collections::{BTreeMap, HashSet};

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::curve::predictor::Rank;
use crate::curve::trainer::CurveParams;
use crate::errors::AppError;
use crate::state::AppState;
use crate::volume::MonthlyVolume;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CurveQuery {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub refresh: bool,
    /// Comma separated keyword list.
    pub keywords: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CurveResponse {
    pub updated_at: DateTime<Utc>,
    pub model_summary: CurveParams,
    pub predict: BTreeMap<String, Rank>,
}

#[derive(Debug, Deserialize)]
pub struct KeywordVolumeRequest {
    pub keywords: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct KeywordVolumeResponse {
    pub volumes: BTreeMap<String, MonthlyVolume>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/curve?refresh=<bool>&keywords=<a,b,c>
pub async fn handle_get_curve(
    State(state): State<AppState>,
    Query(params): Query<CurveQuery>,
) -> Result<Json<CurveResponse>, AppError> {
    let raw = params.keywords.as_deref().unwrap_or_default();
    let keywords = normalize_keywords(raw.split(','));
    check_keyword_limit(&keywords, state.config.max_keywords_per_request)?;

    let result = state
        .engine
        .refresh_and_predict(&keywords, params.refresh)
        .await?;

    Ok(Json(CurveResponse {
        updated_at: result.updated_at,
        model_summary: result.params,
        predict: result.predictions,
    }))
}

/// POST /api/v1/keywords/volume
pub async fn handle_keyword_volume(
    State(state): State<AppState>,
    Json(req): Json<KeywordVolumeRequest>,
) -> Result<Json<KeywordVolumeResponse>, AppError> {
    let keywords = normalize_keywords(req.keywords.iter().map(String::as_str));
    check_keyword_limit(&keywords, state.config.max_keywords_per_request)?;

    let volumes = state.engine.volumes(&keywords).await?;
    Ok(Json(KeywordVolumeResponse { volumes }))
}

/// Query-string boolean: `true/false`, `1/0`, `yes/no`, `on/off`, any case.
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(de::Error::invalid_value(
            de::Unexpected::Str(other),
            &"a boolean flag (true/false, 1/0, yes/no, on/off)",
        )),
    }
}

/// Trims, drops empties, and collapses duplicates while keeping first-seen order.
fn normalize_keywords<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.map(str::trim)
        .filter(|kw| !kw.is_empty())
        .filter(|kw| seen.insert(kw.to_string()))
        .map(str::to_string)
        .collect()
}

fn check_keyword_limit(keywords: &[String], max: usize) -> Result<(), AppError> {
    if keywords.len() > max {
        return Err(AppError::Validation(format!(
            "At most {max} keywords per request, got {}",
            keywords.len()
        )));
    }
    Ok(())
}

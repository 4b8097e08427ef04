use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VolumeObservation {
    pub id: i64,
    pub keyword: String,
    pub month: String,
    pub volume_total: i64,
    pub created_at: DateTime<Utc>,
}

/// The singleton curve row exactly as persisted. `params` is decoded by the engine,
/// so a corrupt blob can be detected and retrained instead of failing the read.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CurveModelRow {
    pub params: Value,
    pub updated_at: DateTime<Utc>,
}

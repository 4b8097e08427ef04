//! Curve Trainer: fits the rank curve from every known volume observation.
//!
//! Only the pivot is learned (mean volume). Steepness and scale are fixed policy
//! constants, with a separate default set used before any observation exists.

use serde::{Deserialize, Serialize};

use crate::curve::CurveError;

pub const DEFAULT_PIVOT: f64 = 5000.0;
pub const DEFAULT_STEEPNESS: f64 = 0.0015;
pub const DEFAULT_SCALE: f64 = 900.0;

pub const TRAINED_STEEPNESS: f64 = 0.002;
pub const TRAINED_SCALE: f64 = 800.0;

/// Logistic curve parameters. Serialized as the persisted model blob and as the
/// `model_summary` of the curve endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveParams {
    pub pivot: f64,
    pub steepness: f64,
    pub scale: f64,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            pivot: DEFAULT_PIVOT,
            steepness: DEFAULT_STEEPNESS,
            scale: DEFAULT_SCALE,
        }
    }
}

impl CurveParams {
    /// Decodes a persisted blob, rejecting anything the predictor can't evaluate.
    pub fn from_blob(blob: &serde_json::Value) -> Result<Self, CurveError> {
        let params: CurveParams = serde_json::from_value(blob.clone())
            .map_err(|e| CurveError::ModelCorrupt(format!("undecodable parameters: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_blob(&self) -> serde_json::Value {
        serde_json::json!({
            "pivot": self.pivot,
            "steepness": self.steepness,
            "scale": self.scale,
        })
    }

    pub fn validate(&self) -> Result<(), CurveError> {
        for (name, value) in [
            ("pivot", self.pivot),
            ("steepness", self.steepness),
            ("scale", self.scale),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CurveError::ModelCorrupt(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Aggregate of every stored observation; all the trainer needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSummary {
    pub count: i64,
    pub mean: f64,
}

impl VolumeSummary {
    pub fn from_totals(totals: &[i64]) -> Self {
        if totals.is_empty() {
            return Self {
                count: 0,
                mean: 0.0,
            };
        }
        let sum: f64 = totals.iter().map(|&v| v as f64).sum();
        Self {
            count: totals.len() as i64,
            mean: sum / totals.len() as f64,
        }
    }
}

/// Fits parameters over the summary of all stored observations.
pub fn train(summary: &VolumeSummary) -> CurveParams {
    if summary.count == 0 {
        return CurveParams::default();
    }
    CurveParams {
        pivot: summary.mean,
        steepness: TRAINED_STEEPNESS,
        scale: TRAINED_SCALE,
    }
}

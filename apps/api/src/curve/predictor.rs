use std::fmt;

use serde::{Serialize, Serializer};

use crate::curve::trainer::CurveParams;

/// Highest rank the curve reports as a number.
pub const MAX_TRACKED_RANK: u32 = 1000;

/// Predicted search-result position for a keyword.
///
/// Ordering puts every tracked position below `Overflow`. Serializes as a bare
/// integer, or as the literal string `"1000+"` once past the trackable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Position(u32),
    Overflow,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Position(p) => write!(f, "{p}"),
            Rank::Overflow => write!(f, "{MAX_TRACKED_RANK}+"),
        }
    }
}

impl Serialize for Rank {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Rank::Position(p) => serializer.serialize_u32(*p),
            Rank::Overflow => serializer.collect_str(self),
        }
    }
}

/// Evaluates the logistic rank curve for a monthly search volume.
///
/// `rank = 1 + floor(scale / (1 + exp(-steepness * (volume - pivot))))`, clamped
/// to at least 1, with anything above 1000 reported as `Rank::Overflow`.
pub fn predict_rank(volume_total: i64, params: &CurveParams) -> Rank {
    let exponent = -params.steepness * (volume_total as f64 - params.pivot);
    let sigmoid = params.scale / (1.0 + exponent.exp());
    // `as` saturates, so a pathological scale can't wrap around.
    let rank = 1_i64.saturating_add(sigmoid.floor() as i64);
    if rank > MAX_TRACKED_RANK as i64 {
        return Rank::Overflow;
    }
    Rank::Position(rank.max(1) as u32)
}

use std::sync::Arc;

use crate::config::Config;
use crate::curve::CurveEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Curve engine wired to the configured store and volume source.
    pub engine: Arc<CurveEngine>,
    pub config: Config,
}

mod config;
mod curve;
mod db;
mod errors;
mod models;
mod routes;
mod state;
mod store;
mod volume;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::curve::clock::{Clock, SystemClock};
use crate::curve::{CurveEngine, SAMPLE_VOLUMES};
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{CurveStore, MemoryCurveStore, PgCurveStore};
use crate::volume::{HashedVolumeSource, HttpVolumeSource, VolumeSource};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rank Curve API v{}", env!("CARGO_PKG_VERSION"));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn CurveStore> = match &config.database_url {
        Some(url) => Arc::new(PgCurveStore::new(create_pool(url).await?)),
        None => {
            warn!("DATABASE_URL not set, using in-memory curve store (data is lost on restart)");
            Arc::new(MemoryCurveStore::new())
        }
    };

    let source: Arc<dyn VolumeSource> = match &config.volume_api_url {
        Some(url) => {
            info!("Volume source: HTTP ({url})");
            Arc::new(HttpVolumeSource::new(
                url,
                config.volume_api_key.clone(),
                Duration::from_secs(config.volume_api_timeout_secs),
            ))
        }
        None => {
            info!("Volume source: offline hashed estimator");
            Arc::new(HashedVolumeSource::new(clock.clone()))
        }
    };

    let engine = CurveEngine::new(store, source, clock);

    if config.seed_sample_volumes {
        engine.seed_volumes(SAMPLE_VOLUMES).await?;
    }

    let state = AppState {
        engine: Arc::new(engine),
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

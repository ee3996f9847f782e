//! chainfees-server: HTTP service for corrected chain fee snapshots.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chainfees::{FetchConfig, Fetcher, Snapshot, SnapshotCache, SnapshotStore};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "chainfees-server")]
#[command(about = "Serve daily chain fees with stablecoin issuer fees subtracted from Ethereum")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,
    /// Aggregator fees endpoint.
    #[arg(long, default_value = "https://api.llama.fi/overview/fees")]
    base_url: String,
    /// Directory holding the snapshot cache database.
    #[arg(long, default_value = "./data/cache")]
    cache_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let args = Args::parse();

    let fetcher = Fetcher::new(FetchConfig {
        base_url: args.base_url,
        ..Default::default()
    })?;
    let cache = match SnapshotCache::open(&cache_path(&args.cache_dir)) {
        Ok(cache) => Some(cache),
        Err(err) => {
            warn!(error = %err, "cache unavailable, serving uncached");
            None
        }
    };
    let store = Arc::new(SnapshotStore::new(fetcher, cache));

    // warm start: drop whatever is cached and fetch a current snapshot;
    // a failure here is retried by the first request
    store.invalidate();
    match store.get().await {
        Ok(snapshot) => info!(
            chains = snapshot.chain_data.len(),
            dates = snapshot.dates.len(),
            "startup refresh complete"
        ),
        Err(err) => warn!(error = %err, "startup refresh failed"),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = Router::new()
        .route("/api/chain-fees", get(chain_fees))
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(store);

    let addr = format!("0.0.0.0:{}", args.port);
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn cache_path(cache_dir: &std::path::Path) -> PathBuf {
    cache_dir.join("snapshots.sqlite")
}

#[derive(Deserialize)]
struct ChainFeesQuery {
    chain_filter: Option<String>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn detail(status: StatusCode, message: String) -> ApiError {
    (status, Json(json!({ "detail": message })))
}

async fn chain_fees(
    State(store): State<Arc<SnapshotStore>>,
    Query(query): Query<ChainFeesQuery>,
) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = store.get().await.map_err(|err| {
        error!(error = %err, "snapshot unavailable");
        detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error fetching data: {err}"),
        )
    })?;
    // an empty filter means no filter
    match query
        .chain_filter
        .as_deref()
        .filter(|chain| !chain.is_empty())
    {
        Some(chain) => {
            let filtered = snapshot
                .filter_chain(chain)
                .map_err(|err| detail(StatusCode::NOT_FOUND, err.to_string()))?;
            Ok(Json(filtered))
        }
        None => Ok(Json(snapshot)),
    }
}

/// Liveness plus cache reachability. Always 200; a broken cache only flips
/// the `cache` field.
async fn health(State(store): State<Arc<SnapshotStore>>) -> Json<serde_json::Value> {
    let cache = if store.cache_healthy() {
        "connected"
    } else {
        "disconnected"
    };
    Json(json!({ "status": "healthy", "cache": cache }))
}

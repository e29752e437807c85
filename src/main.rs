use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticker_manager::cli::Args;
use ticker_manager::pricing::{
    http_client, MemoryBackend, PriceCache, PriceSource, RedisBackend, SourceRouter,
    DEFAULT_FETCH_TIMEOUT,
};
use ticker_manager::publisher::DiscordFactory;
use ticker_manager::store::{FileStore, MemoryStore, TickerStore};
use ticker_manager::{create_router, provision, TickerManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ticker manager");

    let store: Arc<dyn TickerStore> = match args.store_path() {
        Some(dir) => {
            let store = FileStore::open(&dir)
                .await
                .with_context(|| format!("failed to open ticker store at {}", dir.display()))?;
            tracing::info!(path = %dir.display(), "Using file ticker store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("No --db given, tickers will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let client = http_client(DEFAULT_FETCH_TIMEOUT);
    let source = build_source(&args, client.clone());
    let publishers = Arc::new(DiscordFactory::new(client));

    let manager = TickerManager::new(args.manager_config(), store, source, publishers);
    manager.boot().await.context("failed to replay stored tickers")?;

    let app = create_router(manager.clone());
    let listener = tokio::net::TcpListener::bind(&args.address)
        .await
        .with_context(|| format!("failed to bind {}", args.address))?;

    tracing::info!("Ticker manager running on http://{}", args.address);
    tracing::info!("Swagger UI: http://{}/swagger-ui", args.address);

    // Feed the ticker folder through the API once it is listening
    let endpoint = provision::ticker_endpoint(&args.address);
    let folder = args.ticker_folder.clone();
    tokio::spawn(async move {
        provision::provision_from_dir(&folder, &endpoint, &reqwest::Client::new()).await;
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    manager.shutdown().await;
    Ok(())
}

/// Upstream quote sources, behind a cache when enabled
fn build_source(args: &Args, client: reqwest::Client) -> Arc<dyn PriceSource> {
    let upstream: Arc<dyn PriceSource> = Arc::new(SourceRouter::public(client));
    let cache = args.cache_config();
    if !cache.enabled {
        return upstream;
    }

    match RedisBackend::new(&cache) {
        Ok(backend) => {
            tracing::info!(address = %cache.redis_address, db = cache.redis_db, "Caching quotes in Redis");
            Arc::new(PriceCache::new(upstream, Arc::new(backend), cache.ttl))
        }
        Err(e) => {
            tracing::warn!("Redis cache misconfigured, caching in process instead: {}", e);
            Arc::new(PriceCache::new(upstream, Arc::new(MemoryBackend::new()), cache.ttl))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

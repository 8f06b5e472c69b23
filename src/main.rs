//! Apolo charging engine server
//!
//! Rates calls, debits prepaid balances and runs scheduled account actions
//! behind a thin HTTP API.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use apolo_cache::{NoopCacheNotifier, RedisCache, RedisCacheNotifier};
use apolo_core::{
    config::{AppConfig, StorageBackend},
    traits::{AccountStore, CacheNotifier, RatingStore},
};
use apolo_services::{ActionRegistry, Collaborators, Engine, HttpPoster};
use apolo_store::{InMemoryAccountStore, InMemoryRatingStore, RedisAccountStore, RedisRatingStore};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "apolo_charger={},apolo_api={},apolo_services={},apolo_store={},apolo_cache={},actix_web=info",
            log_level, log_level, log_level, log_level, log_level
        ))
    });

    let json = env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

/// Build the store and cache collaborators selected by configuration
async fn collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    let needs_redis = config.storage.backend == StorageBackend::Redis || config.cache.enabled;
    let redis = if needs_redis {
        info!("Connecting to Redis at {}", config.storage.redis_url);
        Some(
            RedisCache::new(&config.storage.redis_url)
                .await
                .context("Redis connection failed")?,
        )
    } else {
        None
    };

    let (accounts, rating): (Arc<dyn AccountStore>, Arc<dyn RatingStore>) =
        match (&config.storage.backend, &redis) {
            (StorageBackend::Redis, Some(cache)) => {
                info!("Using Redis account and rating stores");
                (
                    Arc::new(RedisAccountStore::new(cache.clone())),
                    Arc::new(RedisRatingStore::new(cache.clone())),
                )
            }
            _ => {
                warn!("Using in-memory stores; state is lost on restart");
                (
                    Arc::new(InMemoryAccountStore::new()),
                    Arc::new(InMemoryRatingStore::new()),
                )
            }
        };

    let cache: Arc<dyn CacheNotifier> = match (config.cache.enabled, redis) {
        (true, Some(cache)) => {
            info!("Cache notifications on channel {}", config.cache.reload_channel);
            Arc::new(RedisCacheNotifier::new(cache, config.cache.reload_channel.clone()))
        }
        _ => Arc::new(NoopCacheNotifier),
    };

    let outbound = Arc::new(HttpPoster::new(&config.actions).context("HTTP client setup failed")?);

    Ok(Collaborators {
        accounts,
        rating,
        cache,
        outbound,
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Apolo charger v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Invalid configuration")?;
    let deps = collaborators(&config).await?;
    let engine = Arc::new(Engine::new(deps, ActionRegistry::with_defaults(), &config));

    if config.scheduler.enabled {
        engine.scheduler.start().await.context("Scheduler start failed")?;
    } else {
        info!("Scheduler disabled by configuration");
    }

    let bind_addr = config.server_addr();
    let workers = config.server.workers.max(1);
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let data = web::Data::from(Arc::clone(&engine));
    let served = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(TracingLogger::default())
            .configure(apolo_api::configure)
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("Cannot bind {}", bind_addr))?
    .run()
    .await;

    info!("HTTP server stopped, stopping scheduler");
    if let Err(e) = engine.scheduler.stop().await {
        warn!("Scheduler stop failed: {}", e);
    }

    served.context("HTTP server failed")
}

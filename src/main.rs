//! Callmeter server
//!
//! Hosts the invite signal channel, the wallet ledger and the join
//! credential issuer over HTTP, backed by Redis when configured and by
//! in-process stores otherwise.

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use callmeter_api::{configure_routes, AppState};
use callmeter_auth::CredentialService;
use callmeter_cache::RedisCache;
use callmeter_core::{
    models::RevenueShare,
    traits::{InviteStore, WalletLedger},
    AppConfig,
};
use callmeter_ledger::{MemoryLedger, RedisLedger};
use callmeter_signal::{MemoryInviteStore, RedisInviteStore, SignalChannel, SignalHub};
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
            "callmeter={0},callmeter_api={0},callmeter_signal={0},callmeter_ledger={0},callmeter_auth={0},callmeter_cache={0},actix_web=info",
            log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    if env::var("LOG_FORMAT").map_or(false, |f| f == "json") {
        registry.with(fmt::layer().json()).init();
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

/// Build the ledger and invite store, on Redis when configured
async fn build_stores(
    config: &AppConfig,
    share: RevenueShare,
) -> anyhow::Result<(Arc<dyn WalletLedger>, Arc<dyn InviteStore>)> {
    let Some(redis) = &config.redis else {
        warn!("No Redis configured, using in-memory ledger and inbox");
        return Ok((
            Arc::new(MemoryLedger::new(share)),
            Arc::new(MemoryInviteStore::new()),
        ));
    };

    info!(namespace = %redis.namespace, "Connecting to Redis...");
    let cache = RedisCache::new(&redis.url, &redis.namespace)
        .await
        .context("Failed to connect to Redis")?;
    cache.ping().await.context("Redis ping failed")?;
    info!("Redis connection established");

    Ok((
        Arc::new(RedisLedger::new(cache.clone(), share)),
        Arc::new(RedisInviteStore::new(cache)),
    ))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting Callmeter v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;
    let share = RevenueShare::from_percent(config.billing.host_share_percent)?;

    let (ledger, store) = build_stores(&config, share).await?;

    let hub = Arc::new(SignalHub::new(config.signal.topic_capacity));
    let signal = Arc::new(SignalChannel::new(
        hub,
        store,
        config.signal.invite_ttl_secs,
    ));
    let credentials = Arc::new(CredentialService::new(&config.auth, ledger.clone()));

    info!(
        invite_ttl_secs = config.signal.invite_ttl_secs,
        min_join_balance = config.auth.min_join_balance,
        host_share_percent = config.billing.host_share_percent,
        "Services configured"
    );

    let state = web::Data::new(AppState::new(ledger, signal, credentials));

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    info!(
        "Server starting on http://{} with {} workers",
        bind_address, config.server.workers
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .wrap(middleware::Compress::default())
            .configure(configure_routes)
    })
    .workers(config.server.workers)
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}

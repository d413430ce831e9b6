//! CloutScape Pricing Service
//!
//! Main entry point for the price intelligence engine.
//! This service provides:
//! - Scheduled competitor sampling and sale price derivation
//! - Price history persistence
//! - Change alerts (Discord webhook) and a live WebSocket price feed

use cloutscape_pricing::config::AppConfig;
use cloutscape_pricing::database::{create_pool, run_migrations};
use cloutscape_pricing::error::{map_to_app_error, AppError, AppResult};
use cloutscape_pricing::repositories::PriceHistoryRepository;
use cloutscape_pricing::services::{
    DiscordWebhookNotifier, FanoutNotifier, PriceScheduler, PriceService, QuoteCache, Sampler,
};
use cloutscape_pricing::websocket::WebSocketServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    // Initialize tracing/logging with config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("cloutscape_pricing={},sqlx=warn", config.log_level).into()
    });
    if config.is_production() {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           CloutScape Pricing Service Starting            ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!(
        "Floor price: ${} (cost floor ${} + {} margin)",
        config.pricing.floor_price(),
        config.pricing.cost_floor,
        config.pricing.profit_margin
    );
    info!("Discount rate: {}", config.pricing.discount_rate);

    // =========================================================================
    // DATABASE SETUP
    // =========================================================================
    info!("Connecting to database...");

    let pool = create_pool(&config.database).await.map_err(|e| {
        error!("Failed to create database pool: {}", e);
        AppError::Database(e)
    })?;

    info!("Database connection pool created successfully");

    info!("Running database migrations...");
    run_migrations(&pool, None).await.map_err(|e| {
        error!("Database migration failed: {}", e);
        AppError::Database(e)
    })?;

    info!("Database migrations completed successfully");

    // =========================================================================
    // CORE SERVICES INITIALIZATION
    // =========================================================================
    info!("Initializing core services...");

    let sampler = Sampler::from_config(&config.sources, config.pricing.sample_timeout())?;
    if sampler.source_count() == 0 {
        warn!("No enabled price sources - prices will fall back to the floor");
    }
    info!("✓ Sampler initialized ({} sources)", sampler.source_count());

    let cache = Arc::new(QuoteCache::new(config.pricing.cache_ttl()));
    let history = Arc::new(PriceHistoryRepository::new(pool.clone()));
    let price_service = Arc::new(
        PriceService::new(&config.pricing, sampler, cache).with_history(history),
    );
    info!("✓ Price service initialized (cache TTL {:?})", config.pricing.cache_ttl());

    let ws_server = WebSocketServer::new();
    info!("✓ WebSocket server initialized");

    let notifier = FanoutNotifier::new()
        .with_target(Arc::new(DiscordWebhookNotifier::new(
            config.discord_webhook_url.clone(),
        )))
        .with_target(Arc::new(ws_server.clone()));
    if config.discord_webhook_url.is_none() {
        warn!("DISCORD_WEBHOOK_URL not configured - change alerts go to the live feed only");
    }
    info!("✓ Notifiers initialized ({} targets)", notifier.len());

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================
    info!("Starting background tasks...");

    let scheduler = PriceScheduler::new(price_service.clone(), Arc::new(notifier))
        .with_poll_interval(config.pricing.update_interval())
        .with_change_threshold(config.pricing.change_threshold);
    let scheduler_handle = scheduler.start();
    info!(
        "✓ Price scheduler started ({:?} interval, {}% threshold)",
        config.pricing.update_interval(),
        config.pricing.change_threshold
    );

    // =========================================================================
    // START SERVERS
    // =========================================================================
    let ws_handle = if let Some(http_port) = config.http_port {
        let ws_addr: SocketAddr = format!("0.0.0.0:{}", http_port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid WebSocket address: {}", e)))?;

        info!("Starting WebSocket server on {}...", ws_addr);
        let listener = map_to_app_error(
            TcpListener::bind(ws_addr).await,
            "Failed to bind WebSocket server",
        )?;

        let handle = tokio::spawn(ws_server.clone().serve(listener));
        info!("✓ WebSocket server started on {}", ws_addr);
        Some(handle)
    } else {
        warn!("HTTP_PORT not configured - WebSocket price feed not started");
        None
    };

    // =========================================================================
    // READY
    // =========================================================================
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           CloutScape Pricing Service Ready!              ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shutdown gracefully");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = async {
            if let Some(handle) = ws_handle {
                handle.await.ok();
            } else {
                // Never completes if WebSocket is not running
                futures::future::pending::<()>().await;
            }
        } => {
            error!("WebSocket server exited unexpectedly");
        }
    }

    scheduler_handle.stop().await;
    pool.close().await;

    info!("CloutScape pricing service shutdown complete");
    Ok(())
}

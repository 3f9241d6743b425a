//! Veil Server
//!
//! Standalone server binary: loads configuration, wires the stores for
//! the selected backend and serves the HTTP interaction endpoint until
//! shutdown.

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use veil_core::{Clock, VeilConfig, WallClock};
use veil_server::{AppState, Dispatcher, EchoPayload, RestDelivery};
use veil_store::{
    redis_connect, LocalTimerMeta, MemorySessionStore, RateLimiter, RedisSessionStore,
    RedisTimerMeta, SchedulerConfig, SchedulerStore, SessionStore, TimerMetaStore,
};

/// Veil server CLI
#[derive(Parser, Debug)]
#[command(name = "veil-server")]
#[command(about = "Commit-now, reveal-later interaction service")]
#[command(version)]
struct Cli {
    /// Bind address (overrides VEIL_BIND_ADDRESS)
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let mut config = VeilConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
        config.validate()?;
    }
    tracing::info!(backend = ?config.backend, bind = %config.bind_address, "veil server starting");

    let public_key_hex = config
        .public_key_hex
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("VEIL_PUBLIC_KEY is required to serve interactions"))?;
    let public_key = veil_server::auth::parse_public_key(public_key_hex)
        .ok_or_else(|| anyhow::anyhow!("VEIL_PUBLIC_KEY is not a valid hex Ed25519 key"))?;

    let clock: Arc<dyn Clock> = Arc::new(WallClock);

    let (sessions, timer_meta): (Arc<dyn SessionStore>, Arc<dyn TimerMetaStore>) =
        match config.backend {
            veil_core::BackendKind::Memory => (
                Arc::new(MemorySessionStore::new(
                    Arc::clone(&clock),
                    config.session_ttl_ms(),
                )),
                Arc::new(LocalTimerMeta::new()),
            ),
            veil_core::BackendKind::Redis => {
                // validate() guarantees the URL is present for this backend.
                let url = config.redis_url.as_deref().unwrap_or_default();
                let conn = redis_connect(url).await?;
                (
                    Arc::new(RedisSessionStore::with_connection(
                        conn.clone(),
                        &config.key_prefix,
                        config.session_ttl_seconds,
                    )),
                    Arc::new(RedisTimerMeta::new(conn, &config.key_prefix)),
                )
            }
        };

    let scheduler = SchedulerStore::new(
        SchedulerConfig {
            timers_per_scope_max: config.timers_per_scope_max,
            max_lifetime_ms: config.timer_lifetime_ms(),
        },
        Arc::clone(&clock),
        timer_meta,
    );
    let limiter = RateLimiter::new(
        Arc::clone(&clock),
        config.rate_limit_actions_max,
        config.rate_limit_window_seconds * 1_000,
    );
    let delivery = Arc::new(RestDelivery::new(config.delivery_base_url.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        sessions,
        scheduler.clone(),
        limiter,
        Arc::new(EchoPayload),
        delivery.clone(),
        clock,
        config.session_ttl_ms(),
    ));

    let app = veil_server::router(AppState::new(dispatcher, delivery, public_key));
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Local drivers hold no durable state; halt them cleanly so remote
    // instances see consistent metadata.
    scheduler.stop_all().await;
    tracing::info!("veil server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install shutdown handler");
    }
}

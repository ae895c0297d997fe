mod bot;
mod commands;
mod config;
mod dashboard;
mod error;
mod media;
mod platform;
mod retry;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::SharedState;
use crate::config::Config;
use crate::dashboard::logs::LogBuffer;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let logs = LogBuffer::default();

    // Initialize logging; the dashboard reads the second sink
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mediabot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(logs.clone()),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Command prefix: {}", config.bot.command_prefix);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    if config.dashboard.enabled {
        info!("  Dashboard: {}", config.dashboard.bind);
    }

    let shared = Arc::new(SharedState::new(config.clone(), config_path, logs));
    shared.commands.register_builtin().await;

    let scheduler = Scheduler::new().await?;
    scheduler::schedule_cooldown_sweep(
        &scheduler,
        &config.bot.cooldown_sweep_cron,
        shared.commands.clone(),
    )
    .await?;
    scheduler.start().await?;

    if config.dashboard.enabled {
        let dashboard_state = shared.clone();
        let bind = config.dashboard.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve(dashboard_state, bind).await {
                error!("Dashboard stopped: {:#}", e);
            }
        });
    }

    loop {
        let config = shared.config.read().await.clone();
        let shutdown = CancellationToken::new();

        let watcher = {
            let shared = shared.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shared.restart_requested().await;
                shutdown.cancel();
            })
        };

        info!("Bot is starting...");
        let result = bot::run(shared.clone(), config, shutdown.clone()).await;
        watcher.abort();
        result?;

        if !shutdown.is_cancelled() {
            break;
        }

        if let Err(e) = shared.reload_config().await {
            error!("Keeping previous configuration: {:#}", e);
        }
        info!("Restarting bot");
    }

    info!("Bot stopped");
    Ok(())
}

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use teloxide::Bot;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::{CommandContext, CommandRegistry};
use crate::config::Config;
use crate::dashboard::logs::LogBuffer;
use crate::error::CommandError;
use crate::media::download::Downloader;
use crate::media::outbox::Outbox;
use crate::media::platforms::PlatformRegistry;
use crate::media::{failure_summary, Delivery, MediaService};
use crate::platform::telegram::{self, TelegramTransport};
use crate::platform::IncomingMessage;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("hardcoded regex"));

/// Counters shown by `status` and the dashboard.
#[derive(Debug, Default)]
pub struct Stats {
    pub messages: AtomicU64,
    pub connected: AtomicBool,
}

/// State that outlives a bot restart.
pub struct SharedState {
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    pub config_path: PathBuf,
    pub config: RwLock<Config>,
    pub commands: Arc<CommandRegistry>,
    pub stats: Arc<Stats>,
    pub logs: LogBuffer,
    restart: Notify,
}

impl SharedState {
    pub fn new(config: Config, config_path: PathBuf, logs: LogBuffer) -> Self {
        let commands = Arc::new(CommandRegistry::new(config.bot.cooldown()));
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            config_path,
            config: RwLock::new(config),
            commands,
            stats: Arc::new(Stats::default()),
            logs,
            restart: Notify::new(),
        }
    }

    pub fn request_restart(&self) {
        info!("Restart requested");
        self.restart.notify_one();
    }

    pub async fn restart_requested(&self) {
        self.restart.notified().await;
    }

    /// Re-reads the config file, keeping the current config if it is invalid.
    pub async fn reload_config(&self) -> Result<()> {
        let fresh = Config::load(&self.config_path)?;
        *self.config.write().await = fresh;
        info!("Configuration reloaded from {}", self.config_path.display());
        Ok(())
    }
}

/// Everything one bot run needs; rebuilt on restart.
pub struct AppState {
    pub shared: Arc<SharedState>,
    pub config: Config,
    pub outbox: Arc<Outbox>,
    pub media: Arc<MediaService>,
    /// Cancelled when this run stops.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        shared: Arc<SharedState>,
        config: Config,
        outbox: Arc<Outbox>,
        media: Arc<MediaService>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared,
            config,
            outbox,
            media,
            shutdown,
        }
    }

    /// A token for one message, cancelled on shutdown or once the pipeline
    /// timeout elapses.
    fn invocation_token(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        let timeout = self.config.media.pipeline_timeout();
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!("Invocation timed out after {:?}", timeout);
                    timer.cancel();
                }
            }
        });
        token
    }
}

/// Connects to Telegram and serves messages until `shutdown` fires or the
/// process is interrupted.
pub async fn run(shared: Arc<SharedState>, config: Config, shutdown: CancellationToken) -> Result<()> {
    let bot = Bot::new(&config.telegram.bot_token);

    info!("Starting Telegram bot...");
    let transport = TelegramTransport::connect(bot.clone(), config.telegram.media_cache_chat_id)
        .await
        .context("Failed to connect to Telegram")?;

    let client = crate::media::http_client(&config.media).context("Failed to build HTTP client")?;
    let outbox = Arc::new(Outbox::new(
        Arc::new(transport),
        config.media.send_attempts,
        config.media.max_upload_bytes,
    ));
    let platforms = Arc::new(PlatformRegistry::with_defaults(client.clone()).await);
    info!("Media platforms: {}", platforms.names().await.join(", "));
    let downloader = Downloader::new(
        client,
        config.media.max_download_bytes,
        config.media.max_concurrent_downloads,
    );
    let media = Arc::new(MediaService::new(platforms, downloader, outbox.clone()));

    let state = Arc::new(AppState::new(shared.clone(), config, outbox, media, shutdown));

    shared.stats.connected.store(true, Ordering::SeqCst);
    let result = telegram::run(state, bot).await;
    shared.stats.connected.store(false, Ordering::SeqCst);
    result
}

/// Splits `<prefix>name arg...` into the name and its arguments.
pub fn parse_command<'a>(text: &'a str, prefix: &str) -> Option<(&'a str, Vec<String>)> {
    let rest = text.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?;
    Some((name, parts.map(str::to_string).collect()))
}

pub fn find_url(text: &str) -> Option<&str> {
    URL.find(text).map(|m| m.as_str())
}

/// Entry point for every inbound message, whatever platform it came from.
pub async fn handle_message(state: Arc<AppState>, msg: IncomingMessage) {
    if msg.user_id == state.outbox.self_id() || msg.text.trim().is_empty() {
        return;
    }
    state.shared.stats.messages.fetch_add(1, Ordering::Relaxed);

    info!(
        "{} message from {} ({}): {}",
        msg.platform, msg.user_name, msg.user_id, msg.text
    );

    if let Some((name, args)) = parse_command(&msg.text, &state.config.bot.command_prefix) {
        run_command(&state, &msg, name, args).await;
    } else if state.config.bot.auto_media {
        if let Some(url) = find_url(&msg.text) {
            if state.media.supports(url).await {
                auto_media(&state, &msg, url).await;
            }
        }
    }
}

async fn run_command(state: &AppState, msg: &IncomingMessage, name: &str, args: Vec<String>) {
    let cancel = state.invocation_token();
    let _guard = cancel.clone().drop_guard();

    let ctx = CommandContext {
        user_id: msg.user_id,
        thread_id: msg.thread_id,
        message_id: msg.message_id.clone(),
        args,
        raw_text: msg.text.clone(),
        started: state.shared.started,
        cancel,
        outbox: state.outbox.clone(),
        media: state.media.clone(),
        commands: state.shared.commands.clone(),
        stats: state.shared.stats.clone(),
    };

    if let Err(e) = state.shared.commands.execute(name, &ctx).await {
        let reply = match &e {
            CommandError::NotFound(_) | CommandError::Cooldown(_) | CommandError::Usage(_) => {
                debug!("Command {} rejected: {}", name, e);
                e.to_string()
            }
            other => {
                error!("Command {} failed: {}", name, other);
                format!("Error: {other}")
            }
        };
        if let Err(e) = state
            .outbox
            .send_message(&state.shutdown, msg.thread_id, &reply)
            .await
        {
            error!("Failed to send error reply: {}", e);
        }
    }
}

/// Bare links are handled quietly: failures are only logged, partial
/// deliveries get a summary.
async fn auto_media(state: &AppState, msg: &IncomingMessage, url: &str) {
    let cancel = state.invocation_token();
    let _guard = cancel.clone().drop_guard();

    match state.media.deliver(&cancel, msg.thread_id, url).await {
        Ok(Delivery::Sent { count }) => info!("Auto media sent {} item(s) for {}", count, url),
        Ok(Delivery::PartialSent { sent, failures }) => {
            warn!("Auto media sent {} item(s), {} failed", sent, failures.len());
            if let Err(e) = state
                .outbox
                .send_message(&cancel, msg.thread_id, &failure_summary(&failures))
                .await
            {
                error!("Failed to send failure summary: {}", e);
            }
        }
        Err(e) => warn!("Auto media failed for {}: {}", url, e),
    }
}

/// How long the shared state has been alive.
pub fn uptime(shared: &SharedState) -> Duration {
    shared.started.elapsed()
}

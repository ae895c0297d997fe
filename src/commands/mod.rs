pub mod fun;
pub mod info;
pub mod media;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bot::Stats;
use crate::error::{CommandError, MediaError};
use crate::media::outbox::Outbox;
use crate::media::MediaService;

/// Per-invocation state handed to a command.
pub struct CommandContext {
    pub user_id: i64,
    pub thread_id: i64,
    pub message_id: String,
    pub args: Vec<String>,
    /// The full message, prefix and command name included.
    pub raw_text: String,
    /// Process start, for uptime reporting.
    pub started: Instant,
    pub cancel: CancellationToken,
    pub outbox: Arc<Outbox>,
    pub media: Arc<MediaService>,
    pub commands: Arc<CommandRegistry>,
    pub stats: Arc<Stats>,
}

impl CommandContext {
    pub async fn reply(&self, text: &str) -> Result<(), MediaError> {
        self.outbox.send_message(&self.cancel, self.thread_id, text).await
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError>;
}

type CooldownKey = (i64, String);

/// Name to handler map with a per-user, per-command cooldown gate.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, Arc<dyn Command>>>,
    cooldowns: RwLock<HashMap<CooldownKey, tokio::time::Instant>>,
    cooldown: Duration,
}

impl CommandRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            cooldowns: RwLock::new(HashMap::new()),
            cooldown,
        }
    }

    /// Registers under the lower-cased name; a later registration replaces an
    /// earlier one.
    pub async fn register(&self, command: Arc<dyn Command>) {
        let name = command.name().to_lowercase();
        debug!("Registered command {}", name);
        self.commands.write().await.insert(name, command);
    }

    pub async fn register_builtin(&self) {
        self.register(Arc::new(info::Ping)).await;
        self.register(Arc::new(info::Help)).await;
        self.register(Arc::new(info::Uptime)).await;
        self.register(Arc::new(info::About)).await;
        self.register(Arc::new(info::Status)).await;
        self.register(Arc::new(info::Id)).await;
        self.register(Arc::new(fun::Roll)).await;
        self.register(Arc::new(fun::CoinFlip)).await;
        self.register(Arc::new(fun::Say)).await;
        self.register(Arc::new(media::Media)).await;
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.read().await.get(&name.to_lowercase()).cloned()
    }

    /// Runs `name` for `ctx.user_id`. The cooldown is only armed when the
    /// command succeeds.
    pub async fn execute(&self, name: &str, ctx: &CommandContext) -> Result<(), CommandError> {
        let name = name.to_lowercase();
        let command = self
            .get(&name)
            .await
            .ok_or_else(|| CommandError::NotFound(name.clone()))?;

        if let Some(remaining) = self.check_cooldown(ctx.user_id, &name).await {
            return Err(CommandError::Cooldown(remaining));
        }

        info!("Running command {} for user {}", name, ctx.user_id);
        command.execute(ctx).await?;
        self.set_cooldown(ctx.user_id, &name).await;
        Ok(())
    }

    /// Time left before `name` may run again for `user_id`, if any.
    pub async fn check_cooldown(&self, user_id: i64, name: &str) -> Option<Duration> {
        let key = (user_id, name.to_lowercase());
        let cooldowns = self.cooldowns.read().await;
        let expiry = *cooldowns.get(&key)?;
        let now = tokio::time::Instant::now();
        (expiry > now).then(|| expiry - now)
    }

    pub async fn set_cooldown(&self, user_id: i64, name: &str) {
        let expiry = tokio::time::Instant::now() + self.cooldown;
        self.cooldowns
            .write()
            .await
            .insert((user_id, name.to_lowercase()), expiry);
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn clean_cooldowns(&self) -> usize {
        let mut cooldowns = self.cooldowns.write().await;
        let now = tokio::time::Instant::now();
        let before = cooldowns.len();
        cooldowns.retain(|_, expiry| *expiry > now);
        before - cooldowns.len()
    }

    #[cfg(test)]
    pub(crate) async fn cooldown_entries(&self) -> usize {
        self.cooldowns.read().await.len()
    }

    pub async fn active_cooldowns(&self) -> usize {
        let now = tokio::time::Instant::now();
        self.cooldowns
            .read()
            .await
            .values()
            .filter(|expiry| **expiry > now)
            .count()
    }

    pub async fn list(&self) -> HashMap<String, String> {
        self.commands
            .read()
            .await
            .iter()
            .map(|(name, cmd)| (name.clone(), cmd.description().to_string()))
            .collect()
    }
}

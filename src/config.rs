use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_bot_config")]
    pub bot: BotConfig,
    #[serde(default = "default_media_config")]
    pub media: MediaConfig,
    #[serde(default = "default_dashboard_config")]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Empty means everyone may talk to the bot.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
    /// Private chat the bot uploads media into before forwarding file ids.
    pub media_cache_chat_id: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Bare links to supported platforms trigger the media pipeline.
    #[serde(default = "default_true")]
    pub auto_media: bool,
    #[serde(default = "default_cooldown_sweep_cron")]
    pub cooldown_sweep_cron: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_max_bytes")]
    pub max_download_bytes: u64,
    #[serde(default = "default_max_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_pipeline_timeout_secs")]
    pub pipeline_timeout_secs: u64,
    #[serde(default = "default_send_attempts")]
    pub send_attempts: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_bind")]
    pub bind: String,
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_cooldown_secs() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

fn default_cooldown_sweep_cron() -> String {
    "0 */5 * * * *".to_string()
}

// 25 MB, the upload limit of the destination platform
fn default_max_bytes() -> u64 {
    25_000_000
}

fn default_max_concurrent_downloads() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_pipeline_timeout_secs() -> u64 {
    300
}

fn default_send_attempts() -> usize {
    10
}

fn default_dashboard_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_bot_config() -> BotConfig {
    BotConfig {
        command_prefix: default_command_prefix(),
        cooldown_secs: default_cooldown_secs(),
        auto_media: true,
        cooldown_sweep_cron: default_cooldown_sweep_cron(),
    }
}

fn default_media_config() -> MediaConfig {
    MediaConfig {
        max_download_bytes: default_max_bytes(),
        max_upload_bytes: default_max_bytes(),
        max_concurrent_downloads: default_max_concurrent_downloads(),
        fetch_timeout_secs: default_fetch_timeout_secs(),
        pipeline_timeout_secs: default_pipeline_timeout_secs(),
        send_attempts: default_send_attempts(),
    }
}

fn default_dashboard_config() -> DashboardConfig {
    DashboardConfig {
        enabled: true,
        bind: default_dashboard_bind(),
    }
}

impl BotConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl MediaConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token must not be empty");
        }
        if self.bot.command_prefix.is_empty() {
            anyhow::bail!("bot.command_prefix must not be empty");
        }
        if self.media.send_attempts == 0 {
            anyhow::bail!("media.send_attempts must be at least 1");
        }
        if self.media.max_concurrent_downloads == 0 {
            anyhow::bail!("media.max_concurrent_downloads must be at least 1");
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Copy safe to show on the dashboard.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.telegram.bot_token.is_empty() {
            copy.telegram.bot_token = REDACTED.to_string();
        }
        copy
    }
}

pub const REDACTED: &str = "********";

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[telegram]
bot_token = "123:abc"
media_cache_chat_id = -10042
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.bot.command_prefix, "!");
        assert_eq!(config.bot.cooldown(), Duration::from_secs(3));
        assert!(config.bot.auto_media);
        assert_eq!(config.bot.cooldown_sweep_cron, "0 */5 * * * *");
        assert_eq!(config.media.max_download_bytes, 25_000_000);
        assert_eq!(config.media.max_upload_bytes, 25_000_000);
        assert_eq!(config.media.send_attempts, 10);
        assert_eq!(config.media.max_concurrent_downloads, 4);
        assert!(config.telegram.allowed_user_ids.is_empty());
        assert_eq!(config.dashboard.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_overrides_are_read() {
        let content = format!(
            "{MINIMAL}\n[bot]\ncommand_prefix = \"/\"\ncooldown_secs = 10\n\n[media]\nsend_attempts = 3\n"
        );
        let config = Config::parse(&content).unwrap();
        assert_eq!(config.bot.command_prefix, "/");
        assert_eq!(config.bot.cooldown_secs, 10);
        assert_eq!(config.media.send_attempts, 3);
        assert_eq!(config.media.fetch_timeout_secs, 30);
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let content = "[telegram]\nbot_token = \"\"\nmedia_cache_chat_id = 1\n";
        assert!(Config::parse(content).is_err());
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let content = format!("{MINIMAL}\n[media]\nsend_attempts = 0\n");
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn test_redacted_hides_token() {
        let config = Config::parse(MINIMAL).unwrap();
        let shown = config.redacted();
        assert_eq!(shown.telegram.bot_token, REDACTED);
        assert_eq!(config.telegram.bot_token, "123:abc");
    }

    #[test]
    fn test_save_round_trips_through_disk() {
        let config = Config::parse(MINIMAL).unwrap();
        let path = std::env::temp_dir().join(format!("mediabot-{}.toml", std::process::id()));
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.telegram.media_cache_chat_id, -10042);
        assert_eq!(loaded.bot.command_prefix, "!");
    }
}

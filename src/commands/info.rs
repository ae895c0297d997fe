use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;

use crate::commands::{Command, CommandContext};
use crate::error::CommandError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `1d 2h 3m 4s`, leaving out leading units that are zero.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (days, hours, mins, secs) = (
        total / 86_400,
        total / 3_600 % 24,
        total / 60 % 60,
        total % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h {mins}m {secs}s")
    } else if hours > 0 {
        format!("{hours}h {mins}m {secs}s")
    } else if mins > 0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

pub struct Ping;

#[async_trait]
impl Command for Ping {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Checks that the bot is alive"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        ctx.reply("Pong!").await?;
        Ok(())
    }
}

pub struct Help;

#[async_trait]
impl Command for Help {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "Lists all available commands"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let mut commands: Vec<_> = ctx.commands.list().await.into_iter().collect();
        commands.sort();

        let mut text = String::from("Available commands:");
        for (name, description) in commands {
            text.push_str(&format!("\n- {name}: {description}"));
        }
        ctx.reply(&text).await?;
        Ok(())
    }
}

pub struct Uptime;

#[async_trait]
impl Command for Uptime {
    fn name(&self) -> &str {
        "uptime"
    }

    fn description(&self) -> &str {
        "Shows how long the bot has been running"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let text = format!("⏱ Uptime: {}", format_uptime(ctx.started.elapsed()));
        ctx.reply(&text).await?;
        Ok(())
    }
}

pub struct About;

#[async_trait]
impl Command for About {
    fn name(&self) -> &str {
        "about"
    }

    fn description(&self) -> &str {
        "Shows bot information"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let mut names: Vec<String> = ctx.commands.list().await.into_keys().collect();
        names.sort();
        let text = format!(
            "🤖 mediabot\nVersion: {}\nOS/Arch: {}/{}\nCommands: {}",
            VERSION,
            std::env::consts::OS,
            std::env::consts::ARCH,
            names.join(", ")
        );
        ctx.reply(&text).await?;
        Ok(())
    }
}

pub struct Status;

#[async_trait]
impl Command for Status {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Shows uptime, runtime workers and message counters"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let workers = tokio::runtime::Handle::current().metrics().num_workers();
        let text = format!(
            "📊 Bot Status\n⏱ Uptime: {}\n🧵 Runtime workers: {}\n💻 OS/Arch: {}/{}\n📦 Commands: {}\n✉️ Messages handled: {}",
            format_uptime(ctx.started.elapsed()),
            workers,
            std::env::consts::OS,
            std::env::consts::ARCH,
            ctx.commands.list().await.len(),
            ctx.stats.messages.load(Ordering::Relaxed),
        );
        ctx.reply(&text).await?;
        Ok(())
    }
}

pub struct Id;

#[async_trait]
impl Command for Id {
    fn name(&self) -> &str {
        "id"
    }

    fn description(&self) -> &str {
        "Shows thread, sender and bot ids"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let text = format!(
            "🔍 Info\nThread ID: {}\nSender ID: {}\nMessage ID: {}\nBot ID: {}",
            ctx.thread_id,
            ctx.user_id,
            ctx.message_id,
            ctx.outbox.self_id()
        );
        ctx.reply(&text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::context;
    use crate::commands::CommandRegistry;
    use crate::platform::testing::FakeTransport;
    use std::sync::Arc;

    async fn run(name: &str) -> Vec<String> {
        let transport = Arc::new(FakeTransport::new());
        let registry = Arc::new(CommandRegistry::new(Duration::from_secs(3)));
        registry.register_builtin().await;
        let ctx = context(transport.clone(), registry.clone(), 5, &[]);
        registry.execute(name, &ctx).await.unwrap();
        transport.texts()
    }

    #[test]
    fn test_format_uptime_omits_leading_zero_units() {
        assert_eq!(format_uptime(Duration::from_secs(7)), "7s");
        assert_eq!(format_uptime(Duration::from_secs(61)), "1m 1s");
        assert_eq!(format_uptime(Duration::from_secs(3_600)), "1h 0m 0s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }

    #[tokio::test]
    async fn test_ping_replies_pong() {
        assert_eq!(run("ping").await, vec!["Pong!"]);
    }

    #[tokio::test]
    async fn test_help_lists_commands_sorted() {
        let texts = run("help").await;
        let lines: Vec<&str> = texts[0].lines().collect();
        assert_eq!(lines[0], "Available commands:");
        assert!(lines[1].starts_with("- about: "));
        assert!(lines.iter().any(|l| l.starts_with("- media: ")));
        let mut sorted = lines[1..].to_vec();
        sorted.sort();
        assert_eq!(sorted, lines[1..].to_vec());
    }

    #[tokio::test]
    async fn test_id_includes_bot_id() {
        let texts = run("id").await;
        assert!(texts[0].contains("Sender ID: 5"));
        assert!(texts[0].contains("Bot ID: 999"));
    }

    #[tokio::test]
    async fn test_status_reports_counters() {
        let texts = run("status").await;
        assert!(texts[0].starts_with("📊 Bot Status"));
        assert!(texts[0].contains("Commands: 10"));
    }
}

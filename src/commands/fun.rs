use async_trait::async_trait;
use rand::Rng;

use crate::commands::{Command, CommandContext};
use crate::error::CommandError;

const DEFAULT_SIDES: u64 = 6;

/// Number of sides from the first argument; anything unparseable or below 2
/// keeps the default.
fn sides(args: &[String]) -> u64 {
    args.first()
        .and_then(|a| a.parse::<u64>().ok())
        .filter(|n| *n > 1)
        .unwrap_or(DEFAULT_SIDES)
}

pub struct Roll;

#[async_trait]
impl Command for Roll {
    fn name(&self) -> &str {
        "roll"
    }

    fn description(&self) -> &str {
        "Rolls a die (1-6, or !roll <sides>)"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let max = sides(&ctx.args);
        let result = rand::rng().random_range(1..=max);
        ctx.reply(&format!("🎲 Result: {result} (1-{max})")).await?;
        Ok(())
    }
}

pub struct CoinFlip;

#[async_trait]
impl Command for CoinFlip {
    fn name(&self) -> &str {
        "coinflip"
    }

    fn description(&self) -> &str {
        "Flips a coin (heads/tails)"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let side = if rand::rng().random_bool(0.5) {
            "🪙 Heads"
        } else {
            "🪙 Tails"
        };
        ctx.reply(side).await?;
        Ok(())
    }
}

pub struct Say;

#[async_trait]
impl Command for Say {
    fn name(&self) -> &str {
        "say"
    }

    fn description(&self) -> &str {
        "Repeats your message"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        // Echo everything after the command name, spacing and line breaks kept.
        let message = ctx
            .raw_text
            .trim()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        if message.is_empty() {
            return Err(CommandError::Usage("say <message>".into()));
        }
        ctx.reply(&format!("🗣 {message}")).await?;
        Ok(())
    }
}

use async_trait::async_trait;
use tracing::info;

use crate::commands::{Command, CommandContext};
use crate::error::CommandError;
use crate::media::{failure_summary, Delivery};

pub struct Media;

#[async_trait]
impl Command for Media {
    fn name(&self) -> &str {
        "media"
    }

    fn description(&self) -> &str {
        "Downloads media from Instagram, TikTok, Douyin and Facebook"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let url = match ctx.args.first() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => url,
            _ => return Err(CommandError::Usage("media <url>".into())),
        };

        let items = ctx.media.extract(&ctx.cancel, url).await?;
        ctx.reply(&format!("Found {} media items, processing...", items.len()))
            .await?;

        let delivery = ctx
            .media
            .deliver_items(&ctx.cancel, ctx.thread_id, &items)
            .await?;
        if let Delivery::PartialSent { failures, .. } = &delivery {
            ctx.reply(&failure_summary(failures)).await?;
        }
        info!("Media command delivered {} item(s) from {}", delivery.sent(), url);
        Ok(())
    }
}

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InputFile, InputMedia, InputMediaDocument, InputMediaPhoto, InputMediaVideo,
};
use tracing::{debug, info, warn};

use crate::bot::{self, AppState};
use crate::error::TransportError;
use crate::media::MediaPayload;
use crate::platform::{split_text, AttachmentId, AttachmentKind, IncomingMessage, Transport};

/// Telegram caps a media group at 10 items.
const MEDIA_GROUP_LIMIT: usize = 10;
/// Below Telegram's 4096 character cap.
const MESSAGE_LIMIT: usize = 4000;

/// Outbound side of Telegram. Uploads are staged in a cache chat so the
/// returned file ids can be grouped into one album afterwards.
pub struct TelegramTransport {
    bot: Bot,
    self_id: i64,
    cache_chat: ChatId,
}

impl TelegramTransport {
    pub async fn connect(bot: Bot, cache_chat_id: i64) -> Result<Self, TransportError> {
        let me = bot.get_me().await?;
        info!("Connected to Telegram as @{}", me.username());
        Ok(Self {
            self_id: me.user.id.0 as i64,
            bot,
            cache_chat: ChatId(cache_chat_id),
        })
    }
}

fn file_id_of(msg: &Message, kind: AttachmentKind) -> Option<String> {
    match kind {
        AttachmentKind::Photo => msg
            .photo()
            .and_then(|sizes| sizes.last())
            .map(|p| p.file.id.0.clone()),
        AttachmentKind::Video => msg.video().map(|v| v.file.id.0.clone()),
        AttachmentKind::Document => msg
            .document()
            .map(|d| d.file.id.0.clone())
            .or_else(|| msg.animation().map(|a| a.file.id.0.clone())),
    }
}

fn input_media(attachment: &AttachmentId) -> InputMedia {
    let file = InputFile::file_id(FileId(attachment.id.clone()));
    match attachment.kind {
        AttachmentKind::Photo => InputMedia::Photo(InputMediaPhoto::new(file)),
        AttachmentKind::Video => InputMedia::Video(InputMediaVideo::new(file)),
        AttachmentKind::Document => InputMedia::Document(InputMediaDocument::new(file)),
    }
}

/// Albums of at most 10; documents never share an album with photos or videos.
fn albums(attachments: &[AttachmentId]) -> Vec<Vec<AttachmentId>> {
    let (documents, visual): (Vec<_>, Vec<_>) = attachments
        .iter()
        .cloned()
        .partition(|a| a.kind == AttachmentKind::Document);
    [visual, documents]
        .into_iter()
        .filter(|group| !group.is_empty())
        .flat_map(|group| {
            group
                .chunks(MEDIA_GROUP_LIMIT)
                .map(<[AttachmentId]>::to_vec)
                .collect::<Vec<_>>()
        })
        .collect()
}

impl TelegramTransport {
    async fn send_one(&self, chat: ChatId, attachment: &AttachmentId) -> Result<(), TransportError> {
        let file = InputFile::file_id(FileId(attachment.id.clone()));
        match attachment.kind {
            AttachmentKind::Photo => self.bot.send_photo(chat, file).await?,
            AttachmentKind::Video => self.bot.send_video(chat, file).await?,
            AttachmentKind::Document => self.bot.send_document(chat, file).await?,
        };
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn self_id(&self) -> i64 {
        self.self_id
    }

    fn text_limit(&self) -> usize {
        MESSAGE_LIMIT
    }

    async fn send_text(&self, thread_id: i64, text: &str) -> Result<(), TransportError> {
        for chunk in split_text(text, MESSAGE_LIMIT) {
            self.bot.send_message(ChatId(thread_id), chunk).await?;
        }
        Ok(())
    }

    async fn upload(
        &self,
        _thread_id: i64,
        payload: &MediaPayload,
    ) -> Result<AttachmentId, TransportError> {
        let kind = AttachmentKind::for_mime(&payload.mime_type);
        let file = InputFile::memory(payload.data.to_vec()).file_name(payload.filename.clone());
        let staged = match kind {
            AttachmentKind::Photo => self.bot.send_photo(self.cache_chat, file).await?,
            AttachmentKind::Video => self.bot.send_video(self.cache_chat, file).await?,
            AttachmentKind::Document => self.bot.send_document(self.cache_chat, file).await?,
        };
        let id = file_id_of(&staged, kind).ok_or(TransportError::MissingAttachment)?;
        debug!("Staged {} ({} bytes) as {:?}", payload.filename, payload.size(), kind);
        Ok(AttachmentId { id, kind })
    }

    async fn send_attachments(
        &self,
        thread_id: i64,
        attachments: &[AttachmentId],
    ) -> Result<(), TransportError> {
        let chat = ChatId(thread_id);
        for album in albums(attachments) {
            if let [single] = album.as_slice() {
                self.send_one(chat, single).await?;
            } else {
                let media: Vec<InputMedia> = album.iter().map(input_media).collect();
                self.bot.send_media_group(chat, media).await?;
            }
        }
        Ok(())
    }
}

/// Run the Telegram dispatcher until the run's shutdown token fires or the
/// process receives Ctrl-C.
pub async fn run(state: Arc<AppState>, bot: Bot) -> Result<()> {
    let allowed_user_ids = state.config.telegram.allowed_user_ids.clone();

    info!("Starting Telegram platform...");

    let handler = Update::filter_message()
        .filter_map(move |msg: Message| {
            let user = msg.from.as_ref()?;
            if allowed_user_ids.is_empty() || allowed_user_ids.contains(&user.id.0) {
                Some(msg)
            } else {
                None
            }
        })
        .endpoint(handle_update);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build();

    let token = dispatcher.shutdown_token();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        if let Ok(stopping) = token.shutdown() {
            stopping.await;
        }
    });

    dispatcher.dispatch().await;
    info!("Telegram platform stopped");
    Ok(())
}

async fn handle_update(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user = match msg.from.as_ref() {
        Some(user) => user,
        None => return Ok(()),
    };
    let text = match msg.text() {
        Some(t) => t.to_string(),
        None => return Ok(()),
    };

    let incoming = IncomingMessage {
        platform: "telegram".to_string(),
        user_id: user.id.0 as i64,
        thread_id: msg.chat.id.0,
        message_id: msg.id.0.to_string(),
        user_name: user.first_name.clone(),
        text,
    };

    tokio::spawn(bot::handle_message(state, incoming));
    Ok(())
}

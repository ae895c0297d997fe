pub mod telegram;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::media::MediaPayload;

/// A message received from any platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform identifier (e.g., "telegram")
    pub platform: String,
    /// Platform-specific sender ID
    pub user_id: i64,
    /// Conversation the message arrived in; replies go back here
    pub thread_id: i64,
    /// Platform-specific message ID
    pub message_id: String,
    /// Display name of the user
    pub user_name: String,
    /// The message text
    pub text: String,
}

/// What kind of message an uploaded attachment must be sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Video,
    Document,
}

impl AttachmentKind {
    pub fn for_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            AttachmentKind::Video
        } else if mime_type.starts_with("image/") && !mime_type.starts_with("image/gif") {
            AttachmentKind::Photo
        } else {
            AttachmentKind::Document
        }
    }
}

/// Opaque token handed out by [`Transport::upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentId {
    pub id: String,
    pub kind: AttachmentKind,
}

/// Cuts `text` into pieces of at most `limit` bytes, preferring to break
/// after a newline, then after a space. The pieces concatenate back to `text`.
pub fn split_text(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        let mut end = limit;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let window = &rest[..end];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map_or(end, |pos| pos + 1);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Outbound half of a messaging platform.
///
/// Uploading and sending are separate steps so several uploads can be merged
/// into one outbound message.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The bot's own user id on the platform.
    fn self_id(&self) -> i64;

    /// Longest text one `send_text` call accepts, in bytes.
    fn text_limit(&self) -> usize {
        usize::MAX
    }

    async fn send_text(&self, thread_id: i64, text: &str) -> Result<(), TransportError>;

    async fn upload(
        &self,
        thread_id: i64,
        payload: &MediaPayload,
    ) -> Result<AttachmentId, TransportError>;

    async fn send_attachments(
        &self,
        thread_id: i64,
        attachments: &[AttachmentId],
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every outbound call; uploads fail for payloads registered with
    /// [`FakeTransport::fail_upload`].
    #[derive(Default)]
    pub struct FakeTransport {
        pub texts: Mutex<Vec<(i64, String)>>,
        pub uploads: Mutex<Vec<String>>,
        pub sends: Mutex<Vec<(i64, Vec<AttachmentId>)>>,
        upload_failures: Mutex<HashMap<Vec<u8>, usize>>,
        send_failures: AtomicUsize,
        text_failures: AtomicUsize,
        text_limit: Option<usize>,
        crashing: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_text_limit(mut self, limit: usize) -> Self {
            self.text_limit = Some(limit);
            self
        }

        /// Panic inside `upload` for a payload with exactly these bytes.
        pub fn crash_upload(&self, data: &[u8]) {
            self.crashing.lock().unwrap().push(data.to_vec());
        }

        /// Fail the next `times` text sends.
        pub fn fail_texts(&self, times: usize) {
            self.text_failures.store(times, Ordering::SeqCst);
        }

        /// Fail the next `times` uploads of a payload with exactly these bytes.
        pub fn fail_upload(&self, data: &[u8], times: usize) {
            self.upload_failures
                .lock()
                .unwrap()
                .insert(data.to_vec(), times);
        }

        /// Fail the next `times` attachment sends.
        pub fn fail_sends(&self, times: usize) {
            self.send_failures.store(times, Ordering::SeqCst);
        }

        pub fn texts(&self) -> Vec<String> {
            self.texts
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }

        pub fn sent_ids(&self) -> Vec<Vec<String>> {
            self.sends
                .lock()
                .unwrap()
                .iter()
                .map(|(_, ids)| ids.iter().map(|a| a.id.clone()).collect())
                .collect()
        }

        pub fn upload_count(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn self_id(&self) -> i64 {
            999
        }

        fn text_limit(&self) -> usize {
            self.text_limit.unwrap_or(usize::MAX)
        }

        async fn send_text(&self, thread_id: i64, text: &str) -> Result<(), TransportError> {
            let left = self.text_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.text_failures.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::Rejected("text refused".into()));
            }
            self.texts
                .lock()
                .unwrap()
                .push((thread_id, text.to_string()));
            Ok(())
        }

        async fn upload(
            &self,
            _thread_id: i64,
            payload: &MediaPayload,
        ) -> Result<AttachmentId, TransportError> {
            let name = String::from_utf8_lossy(&payload.data).to_string();
            self.uploads.lock().unwrap().push(name.clone());
            if self
                .crashing
                .lock()
                .unwrap()
                .iter()
                .any(|d| d.as_slice() == payload.data.as_ref())
            {
                panic!("upload of {name} crashed");
            }

            let mut failures = self.upload_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(payload.data.as_ref()) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransportError::Rejected(format!("upload of {name} refused")));
                }
            }
            Ok(AttachmentId {
                id: format!("att-{name}"),
                kind: AttachmentKind::for_mime(&payload.mime_type),
            })
        }

        async fn send_attachments(
            &self,
            thread_id: i64,
            attachments: &[AttachmentId],
        ) -> Result<(), TransportError> {
            let left = self.send_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.send_failures.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::Rejected("send refused".into()));
            }
            self.sends
                .lock()
                .unwrap()
                .push((thread_id, attachments.to_vec()));
            Ok(())
        }
    }
}

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MediaError;
use crate::media::MediaPayload;
use crate::platform::{split_text, AttachmentId, Transport};
use crate::retry;

/// Result of a multi-item send that delivered at least one item.
#[derive(Debug, Default)]
pub struct MultiSendReport {
    pub sent: usize,
    pub failures: Vec<MediaError>,
}

/// Outbound side of the bot: every send goes through the retry policy.
pub struct Outbox {
    transport: Arc<dyn Transport>,
    attempts: usize,
    max_upload_bytes: u64,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>, attempts: usize, max_upload_bytes: u64) -> Self {
        Self {
            transport,
            attempts: attempts.max(1),
            max_upload_bytes,
        }
    }

    pub fn self_id(&self) -> i64 {
        self.transport.self_id()
    }

    pub async fn send_message(
        &self,
        cancel: &CancellationToken,
        thread_id: i64,
        text: &str,
    ) -> Result<(), MediaError> {
        let transport = &self.transport;
        // Each chunk retries on its own so delivered chunks are not repeated.
        for chunk in split_text(text, transport.text_limit()) {
            retry::run(retry::immediate(self.attempts), cancel, "send message", || async move {
                transport
                    .send_text(thread_id, chunk)
                    .await
                    .map_err(MediaError::from)
            })
            .await?;
        }
        Ok(())
    }

    fn check_size(&self, payload: &MediaPayload) -> Result<(), MediaError> {
        if payload.size() > self.max_upload_bytes {
            return Err(MediaError::OversizedPayload {
                size: payload.size(),
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        thread_id: i64,
        payload: &MediaPayload,
    ) -> Result<AttachmentId, MediaError> {
        self.check_size(payload)?;
        let transport = &self.transport;
        retry::run(retry::immediate(self.attempts), cancel, "upload", || async move {
            transport
                .upload(thread_id, payload)
                .await
                .map_err(MediaError::from)
        })
        .await
    }

    async fn send_attachments(
        &self,
        cancel: &CancellationToken,
        thread_id: i64,
        attachments: &[AttachmentId],
    ) -> Result<(), MediaError> {
        let transport = &self.transport;
        retry::run(retry::immediate(self.attempts), cancel, "send attachments", || async move {
            transport
                .send_attachments(thread_id, attachments)
                .await
                .map_err(MediaError::from)
        })
        .await
    }

    /// Uploads and sends one payload. Upload and send share one attempt
    /// budget; a failed send uploads again.
    pub async fn send_media(
        &self,
        cancel: &CancellationToken,
        thread_id: i64,
        payload: &MediaPayload,
    ) -> Result<(), MediaError> {
        self.check_size(payload)?;
        let transport = &self.transport;
        retry::run(retry::immediate(self.attempts), cancel, "send media", || async move {
            let attachment = transport.upload(thread_id, payload).await?;
            transport
                .send_attachments(thread_id, std::slice::from_ref(&attachment))
                .await?;
            Ok::<(), MediaError>(())
        })
        .await
    }

    /// Uploads every payload in parallel and sends the successful ones as a
    /// single message. Fails only when nothing was sent.
    pub async fn send_multi_media(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        thread_id: i64,
        payloads: Vec<MediaPayload>,
    ) -> Result<MultiSendReport, MediaError> {
        let indexed = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| (i + 1, p))
            .collect();
        self.send_indexed(cancel, thread_id, indexed).await
    }

    /// Like [`Outbox::send_multi_media`] with caller-chosen item positions,
    /// so failures keep the numbering of the extracted list.
    pub async fn send_indexed(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        thread_id: i64,
        payloads: Vec<(usize, MediaPayload)>,
    ) -> Result<MultiSendReport, MediaError> {
        match payloads.len() {
            0 => return Ok(MultiSendReport::default()),
            1 => {
                let (index, payload) = &payloads[0];
                return match self.send_media(cancel, thread_id, payload).await {
                    Ok(()) => Ok(MultiSendReport {
                        sent: 1,
                        failures: Vec::new(),
                    }),
                    Err(MediaError::Cancelled) => Err(MediaError::Cancelled),
                    Err(e) => {
                        warn!("Upload #{} failed: {}", index, e);
                        Err(MediaError::AllUploadsFailed(vec![MediaError::UploadFailed {
                            index: *index,
                            reason: e.to_string(),
                        }]))
                    }
                };
            }
            _ => {}
        }

        let total = payloads.len();
        let mut failures = Vec::new();
        let mut pending: Vec<Option<usize>> = vec![None; total];
        let mut tasks = JoinSet::new();
        for (position, (index, payload)) in payloads.into_iter().enumerate() {
            if let Err(e) = self.check_size(&payload) {
                failures.push(MediaError::UploadFailed {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
            pending[position] = Some(index);
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = this.upload(&cancel, thread_id, &payload).await;
                (position, result)
            });
        }

        let mut uploaded: Vec<(usize, AttachmentId)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (position, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("Upload task failed to complete: {}", e);
                    continue;
                }
            };
            let Some(index) = pending[position].take() else {
                continue;
            };
            match result {
                Ok(attachment) => uploaded.push((position, attachment)),
                Err(e) => {
                    warn!("Upload #{} failed: {}", index, e);
                    failures.push(MediaError::UploadFailed {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }
        // Tasks that panicked or were aborted never reported back.
        for index in pending.into_iter().flatten() {
            failures.push(MediaError::UploadFailed {
                index,
                reason: "upload task aborted".into(),
            });
        }
        failures.sort_by_key(|e| e.item_index().unwrap_or(usize::MAX));

        if uploaded.is_empty() {
            return Err(MediaError::AllUploadsFailed(failures));
        }

        uploaded.sort_by_key(|(position, _)| *position);
        let attachments: Vec<AttachmentId> = uploaded.into_iter().map(|(_, a)| a).collect();
        debug!("Uploaded {}/{} attachments", attachments.len(), total);

        self.send_attachments(cancel, thread_id, &attachments).await?;
        info!("Sent {} attachment(s) to {}", attachments.len(), thread_id);

        Ok(MultiSendReport {
            sent: attachments.len(),
            failures,
        })
    }
}

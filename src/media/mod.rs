pub mod download;
pub mod extractors;
pub mod outbox;
pub mod platforms;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::media::download::Downloader;
use crate::media::outbox::Outbox;
use crate::media::platforms::PlatformRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Content type assumed when the server does not send one.
    pub fn default_mime(self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One piece of media an extraction strategy found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaDescriptor {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            url: url.into(),
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Video,
            url: url.into(),
        }
    }
}

/// Downloaded bytes ready for upload.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub data: Bytes,
    pub mime_type: String,
    pub filename: String,
}

impl MediaPayload {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            data: data.into(),
            filename: filename_from_mime(&mime_type).to_string(),
            mime_type,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Picks a filename whose extension matches the content type.
pub fn filename_from_mime(mime_type: &str) -> &'static str {
    if mime_type.starts_with("video/") {
        "media.mp4"
    } else if mime_type.contains("image/gif") {
        "media.gif"
    } else if mime_type.contains("image/png") {
        "media.png"
    } else if mime_type.contains("image/webp") {
        "media.webp"
    } else if mime_type.starts_with("image/") {
        "media.jpg"
    } else if mime_type.starts_with("audio/") {
        "media.mp3"
    } else {
        "media.bin"
    }
}

/// Shared HTTP client for extraction and downloads.
pub fn http_client(config: &MediaConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(extractors::USER_AGENT)
        .timeout(config.fetch_timeout())
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(90))
        .cookie_store(true)
        .build()
}

/// How a pipeline run ended when at least one item went out.
#[derive(Debug)]
pub enum Delivery {
    Sent { count: usize },
    PartialSent { sent: usize, failures: Vec<MediaError> },
}

impl Delivery {
    pub fn sent(&self) -> usize {
        match self {
            Delivery::Sent { count } => *count,
            Delivery::PartialSent { sent, .. } => *sent,
        }
    }

    pub fn failures(&self) -> &[MediaError] {
        match self {
            Delivery::Sent { .. } => &[],
            Delivery::PartialSent { failures, .. } => failures,
        }
    }
}

/// Resolve, extract, download in parallel, upload in parallel, send once.
pub struct MediaService {
    platforms: Arc<PlatformRegistry>,
    downloader: Downloader,
    outbox: Arc<Outbox>,
}

impl MediaService {
    pub fn new(platforms: Arc<PlatformRegistry>, downloader: Downloader, outbox: Arc<Outbox>) -> Self {
        Self {
            platforms,
            downloader,
            outbox,
        }
    }

    pub async fn supports(&self, url: &str) -> bool {
        self.platforms.resolve(url).await.is_some()
    }

    /// Runs the extraction strategy for `url`. An empty result is `NoMediaFound`.
    pub async fn extract(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<Vec<MediaDescriptor>, MediaError> {
        let items = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
            items = self.platforms.get_media(cancel, url) => items?,
        };
        if items.is_empty() {
            return Err(MediaError::NoMediaFound);
        }
        Ok(items)
    }

    /// Downloads every item, then uploads the survivors and sends them as one
    /// message. Fails only when nothing could be delivered.
    pub async fn deliver_items(
        &self,
        cancel: &CancellationToken,
        thread_id: i64,
        items: &[MediaDescriptor],
    ) -> Result<Delivery, MediaError> {
        let results = self.downloader.download_all(cancel, items).await;

        let mut payloads = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result.outcome {
                Ok(downloaded) => payloads.push((
                    result.index,
                    MediaPayload::new(downloaded.data, downloaded.mime_type),
                )),
                Err(e) => {
                    warn!("Download #{} ({}) failed: {}", result.index, result.descriptor.url, e);
                    failures.push(match e {
                        MediaError::DownloadFailed { .. } => e,
                        e => MediaError::DownloadFailed {
                            index: result.index,
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        if payloads.is_empty() {
            return Err(MediaError::AllDownloadsFailed(failures));
        }

        let report = match self.outbox.send_indexed(cancel, thread_id, payloads).await {
            Ok(report) => report,
            Err(MediaError::AllUploadsFailed(upload_failures)) => {
                failures.extend(upload_failures);
                failures.sort_by_key(|e| e.item_index().unwrap_or(usize::MAX));
                return Err(MediaError::AllUploadsFailed(failures));
            }
            Err(e) => return Err(e),
        };
        failures.extend(report.failures);
        failures.sort_by_key(|e| e.item_index().unwrap_or(usize::MAX));

        if failures.is_empty() {
            Ok(Delivery::Sent { count: report.sent })
        } else {
            Ok(Delivery::PartialSent {
                sent: report.sent,
                failures,
            })
        }
    }

    /// The whole pipeline for one link.
    pub async fn deliver(
        &self,
        cancel: &CancellationToken,
        thread_id: i64,
        url: &str,
    ) -> Result<Delivery, MediaError> {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("media", run = %run_id, thread = thread_id);
        async {
            let items = self.extract(cancel, url).await?;
            info!("Extracted {} media item(s) from {}", items.len(), url);
            let delivery = self.deliver_items(cancel, thread_id, &items).await?;
            info!(
                "Delivered {}/{} item(s)",
                delivery.sent(),
                items.len()
            );
            Ok(delivery)
        }
        .instrument(span)
        .await
    }
}

/// User-facing summary of items that did not make it.
pub fn failure_summary(failures: &[MediaError]) -> String {
    let mut text = format!("{} item(s) could not be sent:", failures.len());
    for failure in failures {
        text.push_str(&format!("\n- {failure}"));
    }
    text
}

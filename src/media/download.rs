use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MediaError;
use crate::media::MediaDescriptor;

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub data: Bytes,
    pub mime_type: String,
}

/// Outcome for one item; `index` is 1-based and follows the input order.
#[derive(Debug)]
pub struct DownloadResult {
    pub index: usize,
    pub descriptor: MediaDescriptor,
    pub outcome: Result<Downloaded, MediaError>,
}

/// Fetches media URLs in parallel with a size cap per body.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    max_bytes: u64,
    permits: Arc<Semaphore>,
}

impl Downloader {
    pub fn new(client: reqwest::Client, max_bytes: u64, max_concurrent: usize) -> Self {
        Self {
            client,
            max_bytes,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Downloads every item. One failure never affects the others.
    pub async fn download_all(
        &self,
        cancel: &CancellationToken,
        items: &[MediaDescriptor],
    ) -> Vec<DownloadResult> {
        let mut tasks = JoinSet::new();
        for (i, item) in items.iter().enumerate() {
            let this = self.clone();
            let cancel = cancel.clone();
            let item = item.clone();
            tasks.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(MediaError::Cancelled),
                    outcome = this.fetch_with_permit(&item) => outcome,
                };
                (i, outcome)
            });
        }

        let mut slots: Vec<Option<Result<Downloaded, MediaError>>> =
            items.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, outcome)) => slots[i] = Some(outcome),
                Err(e) => warn!("Download task failed to complete: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(items)
            .enumerate()
            .map(|(i, (slot, descriptor))| DownloadResult {
                index: i + 1,
                descriptor: descriptor.clone(),
                outcome: slot.unwrap_or_else(|| {
                    Err(MediaError::DownloadFailed {
                        index: i + 1,
                        reason: "download task aborted".into(),
                    })
                }),
            })
            .collect()
    }

    async fn fetch_with_permit(&self, item: &MediaDescriptor) -> Result<Downloaded, MediaError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MediaError::Cancelled)?;
        self.fetch(item).await
    }

    async fn fetch(&self, item: &MediaDescriptor) -> Result<Downloaded, MediaError> {
        debug!("Downloading {} {}", item.kind, item.url);
        let resp = self.client.get(&item.url).send().await?;
        if !resp.status().is_success() {
            return Err(MediaError::BadStatus(resp.status()));
        }
        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| item.kind.default_mime().to_string());
        let data = read_capped(resp, self.max_bytes).await?;
        debug!("Downloaded {} bytes ({}) from {}", data.len(), mime_type, item.url);
        Ok(Downloaded { data, mime_type })
    }
}

/// Reads the whole body, failing once it exceeds `limit` bytes.
pub(crate) async fn read_capped(
    mut resp: reqwest::Response,
    limit: u64,
) -> Result<Bytes, MediaError> {
    if let Some(size) = resp.content_length() {
        if size > limit {
            return Err(MediaError::OversizedPayload { size, limit });
        }
    }
    let mut buf = BytesMut::new();
    while let Some(chunk) = resp.chunk().await? {
        let size = (buf.len() + chunk.len()) as u64;
        if size > limit {
            return Err(MediaError::OversizedPayload { size, limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Reads at most `limit` bytes and drops the rest of the body.
pub(crate) async fn read_prefix(
    mut resp: reqwest::Response,
    limit: usize,
) -> Result<Bytes, MediaError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = limit - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptors(server: &MockServer, names: &[&str]) -> Vec<MediaDescriptor> {
        names
            .iter()
            .map(|n| MediaDescriptor::video(format!("{}/{}", server.uri(), n)))
            .collect()
    }

    #[tokio::test]
    async fn test_download_keeps_content_type_and_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4; codecs=avc1")
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(b"fast".to_vec()),
            )
            .mount(&server)
            .await;

        let downloader = Downloader::new(reqwest::Client::new(), 1_000, 4);
        let results = downloader
            .download_all(
                &CancellationToken::new(),
                &descriptors(&server, &["slow.mp4", "fast.png"]),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 1);
        let first = results[0].outcome.as_ref().unwrap();
        assert_eq!(first.data.as_ref(), b"slow");
        assert_eq!(first.mime_type, "video/mp4");
        let second = results[1].outcome.as_ref().unwrap();
        assert_eq!(second.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_missing_content_type_falls_back_on_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"raw".to_vec()))
            .mount(&server)
            .await;

        let downloader = Downloader::new(reqwest::Client::new(), 1_000, 1);
        let results = downloader
            .download_all(&CancellationToken::new(), &descriptors(&server, &["a"]))
            .await;
        assert_eq!(results[0].outcome.as_ref().unwrap().mime_type, "video/mp4");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_others() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let downloader = Downloader::new(reqwest::Client::new(), 1_000, 2);
        let results = downloader
            .download_all(&CancellationToken::new(), &descriptors(&server, &["gone", "ok"]))
            .await;

        assert!(matches!(
            results[0].outcome,
            Err(MediaError::BadStatus(s)) if s.as_u16() == 404
        ));
        assert!(results[1].outcome.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let downloader = Downloader::new(reqwest::Client::new(), 16, 1);
        let results = downloader
            .download_all(&CancellationToken::new(), &descriptors(&server, &["big"]))
            .await;
        assert!(matches!(
            results[0].outcome,
            Err(MediaError::OversizedPayload { limit: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_every_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let downloader = Downloader::new(reqwest::Client::new(), 1_000, 2);
        let results = downloader
            .download_all(&cancel, &descriptors(&server, &["a", "b"]))
            .await;
        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, Err(MediaError::Cancelled))));
    }

    #[tokio::test]
    async fn test_cancel_during_downloads_returns_promptly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let downloader = Downloader::new(reqwest::Client::new(), 1_000, 2);
        let items = descriptors(&server, &["a", "b", "c"]);
        let results = tokio::time::timeout(
            Duration::from_secs(1),
            downloader.download_all(&cancel, &items),
        )
        .await
        .expect("downloads ignored cancellation");

        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, Err(MediaError::Cancelled))));
    }

    #[tokio::test]
    async fn test_read_prefix_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("abcdefghij"))
            .mount(&server)
            .await;
        let resp = reqwest::get(server.uri()).await.unwrap();
        let prefix = read_prefix(resp, 4).await.unwrap();
        assert_eq!(prefix.as_ref(), b"abcd");
    }
}

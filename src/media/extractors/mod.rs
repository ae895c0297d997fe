//! Per-platform extraction strategies. Each one turns a post link into the
//! direct media URLs it contains.

pub mod douyin;
pub mod facebook;
pub mod instagram;
pub mod tiktok;

use crate::error::MediaError;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Cap on scraped HTML pages.
pub const MAX_HTML_BYTES: usize = 5 * 1024 * 1024;

/// Follows redirects of a share or short link and returns where it lands.
pub async fn resolve_redirect(client: &reqwest::Client, url: &str) -> Result<String, MediaError> {
    let resp = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| failed(format!("failed to resolve {url}: {e}")))?;
    Ok(resp.url().to_string())
}

/// Errors out on non-2xx responses with the platform name in the message.
pub fn check_status(platform: &str, resp: &reqwest::Response) -> Result<(), MediaError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(failed(format!("{platform} returned status {}", resp.status().as_u16())))
    }
}

pub fn failed(reason: impl Into<String>) -> MediaError {
    MediaError::ExtractionFailed(reason.into())
}

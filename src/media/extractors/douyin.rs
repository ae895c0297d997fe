use serde::Deserialize;

use crate::error::MediaError;
use crate::media::extractors::{check_status, failed, USER_AGENT};
use crate::media::platforms::{ExtractContext, PlatformHandler};
use crate::media::MediaDescriptor;

pub const PROXY_API: &str = "https://douyin.cuong.one/api/douyin/detail";

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    video: String,
}

pub fn handler() -> PlatformHandler {
    PlatformHandler::new("douyin", &["douyin.com", "iesdouyin.com"], |ctx, url| async move {
        fetch(&ctx, PROXY_API, &url).await
    })
}

/// Asks the resolver proxy at `api` for the video behind `url`.
pub async fn fetch(
    ctx: &ExtractContext,
    api: &str,
    url: &str,
) -> Result<Vec<MediaDescriptor>, MediaError> {
    let resp = ctx
        .client
        .get(api)
        .query(&[("url", url)])
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| failed(format!("failed to call douyin api: {e}")))?;
    check_status("douyin api", &resp)?;

    let data: ProxyResponse = resp
        .json()
        .await
        .map_err(|e| failed(format!("failed to decode douyin api response: {e}")))?;
    parse(data)
}

fn parse(data: ProxyResponse) -> Result<Vec<MediaDescriptor>, MediaError> {
    if data.status != "ok" || data.video.is_empty() {
        let message = if data.message.is_empty() {
            "douyin video not found".to_string()
        } else {
            data.message
        };
        return Err(failed(message));
    }
    Ok(vec![MediaDescriptor::video(data.video)])
}

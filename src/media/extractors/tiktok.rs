use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::MediaError;
use crate::media::extractors::{check_status, failed, resolve_redirect};
use crate::media::platforms::{ExtractContext, PlatformHandler};
use crate::media::MediaDescriptor;

pub const FEED_API: &str = "https://api16-normal-c-useast2a.tiktokv.com/aweme/v1/feed/";
const APP_USER_AGENT: &str = "TikTok 26.2.0 rv:262018 (iPhone; iOS 14.4.2; en_US) Cronet";

static AWEME_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/video/(\d+)|/photo/(\d+)").expect("hardcoded regex"));

#[derive(Debug, Default, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    aweme_list: Vec<Aweme>,
}

#[derive(Debug, Default, Deserialize)]
struct Aweme {
    image_post_info: Option<ImagePostInfo>,
    video: Option<Video>,
}

#[derive(Debug, Deserialize)]
struct ImagePostInfo {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    display_image: Option<UrlList>,
    #[serde(default)]
    url_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Video {
    play_addr: Option<UrlList>,
}

#[derive(Debug, Deserialize)]
struct UrlList {
    #[serde(default)]
    url_list: Vec<String>,
}

pub fn handler() -> PlatformHandler {
    PlatformHandler::new("tiktok", &["tiktok.com"], |ctx, url| async move {
        let resolved = resolve_redirect(&ctx.client, &url).await?;
        fetch(&ctx, FEED_API, &resolved).await
    })
}

/// The numeric post id in a resolved TikTok link.
pub fn aweme_id(url: &str) -> Option<&str> {
    let caps = AWEME_ID.captures(url)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

/// Looks the post up in the feed API at `api`.
pub async fn fetch(
    ctx: &ExtractContext,
    api: &str,
    url: &str,
) -> Result<Vec<MediaDescriptor>, MediaError> {
    let id = aweme_id(url).ok_or_else(|| failed(format!("no aweme_id found in {url}")))?;

    let resp = ctx
        .client
        .get(api)
        .query(&[("aweme_id", id)])
        .header(reqwest::header::USER_AGENT, APP_USER_AGENT)
        .send()
        .await
        .map_err(|e| failed(format!("failed to call tiktok api: {e}")))?;
    check_status("tiktok api", &resp)?;

    let data: FeedResponse = resp
        .json()
        .await
        .map_err(|e| failed(format!("failed to decode tiktok api response: {e}")))?;
    parse(data)
}

/// Slideshow images win over the video; images with no URL are skipped.
fn parse(data: FeedResponse) -> Result<Vec<MediaDescriptor>, MediaError> {
    let aweme = data
        .aweme_list
        .into_iter()
        .next()
        .ok_or_else(|| failed("no tiktok data found"))?;

    let images: Vec<MediaDescriptor> = aweme
        .image_post_info
        .map(|info| info.images)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|img| {
            img.display_image
                .and_then(|d| d.url_list.into_iter().next())
                .or_else(|| img.url_list.into_iter().next())
        })
        .filter(|url| !url.is_empty())
        .map(MediaDescriptor::image)
        .collect();
    if !images.is_empty() {
        return Ok(images);
    }

    aweme
        .video
        .and_then(|v| v.play_addr)
        .and_then(|p| p.url_list.into_iter().next())
        .map(|url| vec![MediaDescriptor::video(url)])
        .ok_or_else(|| failed("no video or images found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn from_json(value: serde_json::Value) -> FeedResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_aweme_id_from_video_and_photo_links() {
        assert_eq!(
            aweme_id("https://www.tiktok.com/@user/video/7301234567890?lang=en"),
            Some("7301234567890")
        );
        assert_eq!(aweme_id("https://www.tiktok.com/@user/photo/123"), Some("123"));
        assert_eq!(aweme_id("https://www.tiktok.com/@user"), None);
    }

    #[test]
    fn test_images_take_precedence_over_video() {
        let data = from_json(json!({
            "aweme_list": [{
                "image_post_info": {"images": [
                    {"display_image": {"url_list": ["https://img/1.jpg", "https://img/1b.jpg"]}},
                    {"url_list": ["https://img/2.jpg"]},
                    {"display_image": {"url_list": []}}
                ]},
                "video": {"play_addr": {"url_list": ["https://vid/1.mp4"]}}
            }]
        }));
        let items = parse(data).unwrap();
        assert_eq!(
            items,
            vec![
                MediaDescriptor::image("https://img/1.jpg"),
                MediaDescriptor::image("https://img/2.jpg"),
            ]
        );
    }

    #[test]
    fn test_video_when_no_images() {
        let data = from_json(json!({
            "aweme_list": [{"video": {"play_addr": {"url_list": ["https://vid/1.mp4"]}}}]
        }));
        assert_eq!(parse(data).unwrap(), vec![MediaDescriptor::video("https://vid/1.mp4")]);
    }

    #[test]
    fn test_empty_feed_is_an_error() {
        let err = parse(from_json(json!({"aweme_list": []}))).unwrap_err();
        assert_eq!(err.to_string(), "extraction failed: no tiktok data found");
        let err = parse(from_json(json!({"aweme_list": [{}]}))).unwrap_err();
        assert_eq!(err.to_string(), "extraction failed: no video or images found");
    }

    #[tokio::test]
    async fn test_fetch_queries_feed_with_app_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("aweme_id", "555"))
            .and(header("user-agent", APP_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "aweme_list": [{"video": {"play_addr": {"url_list": ["https://vid/555.mp4"]}}}]
            })))
            .mount(&server)
            .await;

        let ctx = ExtractContext {
            client: reqwest::Client::new(),
            cancel: CancellationToken::new(),
        };
        let items = fetch(&ctx, &server.uri(), "https://www.tiktok.com/@u/video/555")
            .await
            .unwrap();
        assert_eq!(items, vec![MediaDescriptor::video("https://vid/555.mp4")]);
    }
}

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::MediaError;
use crate::media::download::read_prefix;
use crate::media::extractors::{check_status, failed, resolve_redirect, MAX_HTML_BYTES, USER_AGENT};
use crate::media::platforms::{ExtractContext, PlatformHandler};
use crate::media::MediaDescriptor;
use crate::retry;

const DOC_ID: &str = "9510064595728286";
const IG_APP_ID: &str = "936619743392459";
const RATE_LIMIT_RETRIES: usize = 5;

static CSRF_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"csrftoken=([^;]+)").expect("hardcoded regex"));
static SHORTCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(p|reel|tv|reels)/([^/?#]+)").expect("hardcoded regex")
});

/// Where the extractor talks to; swapped out in tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub home: String,
    pub graphql: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            home: "https://www.instagram.com/".to_string(),
            graphql: "https://www.instagram.com/graphql/query".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<GraphqlData>,
}

#[derive(Debug, Deserialize)]
struct GraphqlData {
    xdt_shortcode_media: Option<ShortcodeMedia>,
}

#[derive(Debug, Deserialize)]
struct ShortcodeMedia {
    #[serde(rename = "__typename", default)]
    typename: String,
    #[serde(flatten)]
    node: Node,
    edge_sidecar_to_children: Option<Edges>,
}

#[derive(Debug, Deserialize)]
struct Edges {
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: Node,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    video_url: String,
    #[serde(default)]
    display_url: String,
}

impl Node {
    fn descriptor(self) -> MediaDescriptor {
        if self.is_video {
            MediaDescriptor::video(self.video_url)
        } else {
            MediaDescriptor::image(self.display_url)
        }
    }
}

pub fn handler() -> PlatformHandler {
    PlatformHandler::new("instagram", &["instagram.com", "instagr.am"], |ctx, url| async move {
        fetch(&ctx, &Endpoints::default(), &url).await
    })
}

fn path_segments(url: &str) -> Vec<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .map(|segs| segs.filter(|s| !s.is_empty()).map(str::to_string).collect())
        })
        .unwrap_or_default()
}

pub fn is_share_url(url: &str) -> bool {
    path_segments(url).iter().any(|s| s == "share")
}

/// The post identifier following a `p`, `reel`, `tv` or `reels` path segment.
pub fn shortcode(url: &str) -> Option<String> {
    let segments = path_segments(url);
    let from_path = segments
        .windows(2)
        .find(|w| matches!(w[0].as_str(), "p" | "reel" | "tv" | "reels"))
        .map(|w| w[1].clone());
    from_path.or_else(|| {
        SHORTCODE
            .captures(url)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

pub async fn fetch(
    ctx: &ExtractContext,
    endpoints: &Endpoints,
    url: &str,
) -> Result<Vec<MediaDescriptor>, MediaError> {
    let url = if is_share_url(url) {
        resolve_redirect(&ctx.client, url).await?
    } else {
        url.to_string()
    };
    let code = shortcode(&url).ok_or_else(|| failed("invalid instagram url"))?;
    debug!("Instagram shortcode {}", code);

    let csrf = csrf_token(ctx, &endpoints.home).await?;
    let data = query(ctx, &endpoints.graphql, &code, &csrf).await?;
    parse(data)
}

async fn csrf_token(ctx: &ExtractContext, home: &str) -> Result<String, MediaError> {
    let resp = ctx
        .client
        .get(home)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| failed(format!("failed to fetch instagram home: {e}")))?;
    check_status("instagram home", &resp)?;

    if let Some(cookie) = resp.cookies().find(|c| c.name() == "csrftoken") {
        return Ok(cookie.value().to_string());
    }

    let body = read_prefix(resp, MAX_HTML_BYTES).await?;
    let body = String::from_utf8_lossy(&body);
    CSRF_TOKEN
        .captures(&body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| failed("csrf token not found"))
}

/// Posts the GraphQL query, backing off on 429 and 403. A `Retry-After`
/// header overrides the computed delay.
async fn query(
    ctx: &ExtractContext,
    graphql: &str,
    code: &str,
    csrf: &str,
) -> Result<GraphqlResponse, MediaError> {
    let variables = json!({
        "shortcode": code,
        "fetch_tagged_user_count": null,
        "hoisted_comment_id": null,
        "hoisted_reply_id": null,
    })
    .to_string();

    let mut delays = retry::doubling(Duration::from_secs(1), RATE_LIMIT_RETRIES);
    loop {
        let resp = ctx
            .client
            .post(graphql)
            .form(&[("variables", variables.as_str()), ("doc_id", DOC_ID)])
            .header("X-CSRFToken", csrf)
            .header("X-IG-App-ID", IG_APP_ID)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(reqwest::header::REFERER, "https://www.instagram.com/")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::COOKIE, format!("csrftoken={csrf}"))
            .send()
            .await
            .map_err(|e| failed(format!("failed to call instagram graphql: {e}")))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            if let Some(delay) = delays.next() {
                let wait = retry_after(&resp).unwrap_or(delay);
                debug!("Instagram answered {}, retrying in {:?}", status, wait);
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(MediaError::Cancelled),
                    _ = tokio::time::sleep(wait) => continue,
                }
            }
        }
        check_status("instagram graphql", &resp)?;

        return resp
            .json()
            .await
            .map_err(|e| failed(format!("failed to decode instagram response: {e}")));
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Carousels yield one item per child; anything else is a single item.
fn parse(data: GraphqlResponse) -> Result<Vec<MediaDescriptor>, MediaError> {
    let media = data
        .data
        .and_then(|d| d.xdt_shortcode_media)
        .ok_or(MediaError::NoMediaFound)?;

    if media.typename == "XDTGraphSidecar" {
        return Ok(media
            .edge_sidecar_to_children
            .map(|e| e.edges)
            .unwrap_or_default()
            .into_iter()
            .map(|edge| edge.node.descriptor())
            .collect());
    }
    Ok(vec![media.node.descriptor()])
}

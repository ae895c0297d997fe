use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::MediaError;
use crate::media::download::read_prefix;
use crate::media::extractors::{check_status, failed, resolve_redirect, MAX_HTML_BYTES, USER_AGENT};
use crate::media::platforms::{ExtractContext, PlatformHandler};
use crate::media::MediaDescriptor;
use crate::retry;

const PAGE_ATTEMPTS: usize = 10;

const BROWSER_HEADERS: &[(&str, &str)] = &[
    ("sec-fetch-user", "?1"),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("cache-control", "max-age=0"),
    ("upgrade-insecure-requests", "1"),
    ("accept-language", "en-GB,en;q=0.9"),
    ("user-agent", USER_AGENT),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
];

fn patterns(list: &[&str]) -> Vec<Regex> {
    list.iter()
        .map(|p| Regex::new(p).expect("hardcoded regex"))
        .collect()
}

static SD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    patterns(&[
        r#""browser_native_sd_url":"(.*?)""#,
        r#""playable_url":"(.*?)""#,
        r#"sd_src\s*:\s*"([^"]*)""#,
        r#""src":"[^"]*(https://[^"]*)"#,
    ])
});

static HD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    patterns(&[
        r#""browser_native_hd_url":"(.*?)""#,
        r#""playable_url_quality_hd":"(.*?)""#,
        r#"hd_src\s*:\s*"([^"]*)""#,
    ])
});

pub fn handler() -> PlatformHandler {
    PlatformHandler::new("facebook", &["facebook.com", "fb.watch"], |ctx, url| async move {
        fetch(&ctx, &url).await
    })
}

pub async fn fetch(ctx: &ExtractContext, url: &str) -> Result<Vec<MediaDescriptor>, MediaError> {
    let url = if url.contains("/share/") {
        resolve_redirect(&ctx.client, url).await?
    } else {
        url.to_string()
    };

    let url = url.as_str();
    let video = retry::run(
        retry::immediate(PAGE_ATTEMPTS),
        &ctx.cancel,
        "facebook page",
        || scrape(&ctx.client, url),
    )
    .await
    .map_err(|e| match e {
        MediaError::Cancelled => MediaError::Cancelled,
        other => failed(format!("facebook video failed after {PAGE_ATTEMPTS} attempts: {other}")),
    })?;
    Ok(vec![MediaDescriptor::video(video)])
}

fn browser_headers() -> HeaderMap {
    BROWSER_HEADERS
        .iter()
        .map(|&(k, v)| (HeaderName::from_static(k), HeaderValue::from_static(v)))
        .collect()
}

async fn scrape(client: &reqwest::Client, url: &str) -> Result<String, MediaError> {
    let resp = client
        .get(url)
        .headers(browser_headers())
        .send()
        .await
        .map_err(|e| failed(format!("failed to fetch facebook url: {e}")))?;
    check_status("facebook", &resp)?;
    let body = read_prefix(resp, MAX_HTML_BYTES).await?;
    find_video_url(&String::from_utf8_lossy(&body)).ok_or_else(|| failed("no video url found"))
}

fn first_capture(patterns: &[Regex], page: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Picks the HD stream when the page has one, the SD stream otherwise.
pub fn find_video_url(page: &str) -> Option<String> {
    let page = page.replace("&quot;", "\"").replace("&amp;", "&");
    let sd = first_capture(&SD_PATTERNS, &page).filter(|u| !u.is_empty());
    let hd = first_capture(&HD_PATTERNS, &page).filter(|u| !u.is_empty());
    hd.or(sd).map(|u| u.replace(r"\/", "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hd_preferred_over_sd() {
        let page = r#"{"browser_native_sd_url":"https:\/\/video.test\/sd.mp4","browser_native_hd_url":"https:\/\/video.test\/hd.mp4"}"#;
        assert_eq!(
            find_video_url(page).as_deref(),
            Some("https://video.test/hd.mp4")
        );
    }

    #[test]
    fn test_sd_fallback_and_html_entities() {
        let page = r#"<div data-store="{&quot;playable_url&quot;:&quot;https:\/\/video.test\/a.mp4?x=1&amp;y=2&quot;}"></div>"#;
        assert_eq!(
            find_video_url(page).as_deref(),
            Some("https://video.test/a.mp4?x=1&y=2")
        );
    }

    #[test]
    fn test_legacy_sd_src() {
        let page = r#"videoData:[{hd_src:null,sd_src:"https://video.test/old.mp4"}]"#;
        assert_eq!(
            find_video_url(page).as_deref(),
            Some("https://video.test/old.mp4")
        );
    }

    #[test]
    fn test_page_without_video() {
        assert_eq!(find_video_url("<html>nothing here</html>"), None);
    }

    #[test]
    fn test_browser_headers_are_valid() {
        let headers = browser_headers();
        assert_eq!(headers.len(), BROWSER_HEADERS.len());
        assert_eq!(headers["accept-language"], "en-GB,en;q=0.9");
    }
}

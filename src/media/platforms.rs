use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::MediaError;
use crate::media::extractors;
use crate::media::MediaDescriptor;

/// What an extraction strategy gets to work with.
#[derive(Clone)]
pub struct ExtractContext {
    pub client: reqwest::Client,
    pub cancel: CancellationToken,
}

pub type ExtractFn = Arc<
    dyn Fn(ExtractContext, String) -> BoxFuture<'static, Result<Vec<MediaDescriptor>, MediaError>>
        + Send
        + Sync,
>;

/// A named platform: the hosts it claims and how to pull media out of a link.
#[derive(Clone)]
pub struct PlatformHandler {
    pub name: String,
    pub hosts: Vec<String>,
    extract: ExtractFn,
}

impl PlatformHandler {
    pub fn new<F, Fut>(name: &str, hosts: &[&str], extract: F) -> Self
    where
        F: Fn(ExtractContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<MediaDescriptor>, MediaError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            hosts: hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
            extract: Arc::new(move |ctx, url| extract(ctx, url).boxed()),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match_host(url, &self.hosts)
    }
}

/// True when the host of `url` is one of `hosts` or a subdomain of one.
///
/// Only the parsed host is compared, so a platform name inside a path or
/// query string never matches. Unparseable input matches nothing.
pub fn match_host(url: &str, hosts: &[String]) -> bool {
    let Ok(parsed) = url::Url::parse(url.trim()) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
}

/// Ordered platform handlers; the first handler whose hosts match wins.
pub struct PlatformRegistry {
    handlers: RwLock<Vec<PlatformHandler>>,
    client: reqwest::Client,
}

impl PlatformRegistry {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            client,
        }
    }

    /// Registry with the built-in platforms in their resolution order.
    pub async fn with_defaults(client: reqwest::Client) -> Self {
        let registry = Self::new(client);
        registry.register(extractors::instagram::handler()).await;
        registry.register(extractors::tiktok::handler()).await;
        registry.register(extractors::douyin::handler()).await;
        registry.register(extractors::facebook::handler()).await;
        registry
    }

    pub async fn register(&self, handler: PlatformHandler) {
        debug!("Registered platform {} ({})", handler.name, handler.hosts.join(", "));
        self.handlers.write().await.push(handler);
    }

    pub async fn resolve(&self, url: &str) -> Option<PlatformHandler> {
        self.handlers
            .read()
            .await
            .iter()
            .find(|h| h.matches(url))
            .cloned()
    }

    pub async fn get_media(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<Vec<MediaDescriptor>, MediaError> {
        let handler = self
            .resolve(url)
            .await
            .ok_or(MediaError::UnsupportedPlatform)?;
        debug!("Extracting {} via {}", url, handler.name);
        let ctx = ExtractContext {
            client: self.client.clone(),
            cancel: cancel.clone(),
        };
        (handler.extract)(ctx, url.to_string()).await
    }

    pub async fn names(&self) -> Vec<String> {
        self.handlers
            .read()
            .await
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }
}

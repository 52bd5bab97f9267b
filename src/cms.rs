//! Read-through cached access to landing-page content.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use utoipa::ToSchema;

use crate::cache::{CacheStats, CacheWarmer, ContentCache};
use crate::clock::Clock;
use crate::cms_models::CmsContent;
use crate::config::{CmsProviderKind, Config};
use crate::contentful_client::ContentfulClient;
use crate::errors::AppError;
use crate::strapi_client::StrapiClient;

/// An upstream headless CMS.
///
/// `Ok(None)` means the provider answered but has no hero section, which
/// makes the whole aggregate unusable.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_all(&self) -> Result<Option<CmsContent>, AppError>;
}

/// Stand-in used when the selected provider lacks credentials.
pub struct UnconfiguredProvider {
    name: &'static str,
}

#[async_trait]
impl ContentProvider for UnconfiguredProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch_all(&self) -> Result<Option<CmsContent>, AppError> {
        Err(AppError::ExternalApiError(format!(
            "CMS provider {} is not configured",
            self.name
        )))
    }
}

/// Builds the provider selected by `CMS_PROVIDER`.
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn ContentProvider>, AppError> {
    match config.cms_provider {
        CmsProviderKind::Strapi => match &config.strapi_url {
            Some(url) => Ok(Arc::new(StrapiClient::new(
                url,
                config.strapi_api_token.clone(),
            )?)),
            None => {
                tracing::warn!("CMS: STRAPI_URL not configured, content will be unavailable");
                Ok(Arc::new(UnconfiguredProvider { name: "strapi" }))
            }
        },
        CmsProviderKind::Contentful => {
            match (&config.contentful_space_id, &config.contentful_access_token) {
                (Some(space), Some(token)) => Ok(Arc::new(ContentfulClient::new(
                    &config.contentful_base_url,
                    space.clone(),
                    token.clone(),
                    config.contentful_environment.clone(),
                )?)),
                _ => {
                    tracing::warn!(
                        "CMS: CONTENTFUL_SPACE_ID or CONTENTFUL_ACCESS_TOKEN not configured, content will be unavailable"
                    );
                    Ok(Arc::new(UnconfiguredProvider { name: "contentful" }))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CmsHealth {
    pub status: HealthStatus,
    pub provider: String,
    /// Time of the last successful fetch, milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetch: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<CacheStats>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    content: CmsContent,
    fetched_at: i64,
}

type SharedSnapshot = Arc<RwLock<Option<Snapshot>>>;

/// One provider fetch that records the last good result.
#[derive(Clone)]
struct FetchJob {
    provider: Arc<dyn ContentProvider>,
    snapshot: SharedSnapshot,
    clock: Arc<dyn Clock>,
}

impl FetchJob {
    async fn run(&self) -> Result<Option<CmsContent>, AppError> {
        let content = self.provider.fetch_all().await?;
        if let Some(content) = &content {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|p| p.into_inner());
            *snapshot = Some(Snapshot {
                content: content.clone(),
                fetched_at: self.clock.now_millis(),
            });
        }
        Ok(content)
    }

    async fn run_for_cache(self) -> Result<Value, AppError> {
        match self.run().await? {
            Some(content) => serde_json::to_value(content)
                .map_err(|e| AppError::InternalError(format!("Failed to encode CMS content: {}", e))),
            None => Err(AppError::ExternalApiError(
                "Hero section missing from CMS".to_string(),
            )),
        }
    }
}

/// CMS facade: provider + cache + stale fallback.
pub struct CmsClient {
    job: FetchJob,
    cache: Arc<dyn ContentCache>,
    warmer: CacheWarmer,
    ttl: Duration,
}

impl CmsClient {
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        cache: Arc<dyn ContentCache>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            job: FetchJob {
                provider,
                snapshot: Arc::new(RwLock::new(None)),
                clock,
            },
            warmer: CacheWarmer::new(cache.clone()),
            cache,
            ttl,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.job.provider.name()
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.backend()
    }

    fn cache_key(&self) -> String {
        format!("cms:{}:allContent", self.provider_name())
    }

    async fn cached(&self, key: &str) -> Option<CmsContent> {
        let value = self.cache.get(key).await?;
        match serde_json::from_value(value) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::warn!("CMS: Discarding undecodable cache entry {}: {}", key, e);
                self.cache.delete(key).await;
                None
            }
        }
    }

    fn last_known_good(&self) -> Option<CmsContent> {
        self.job
            .snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|s| s.content.clone())
    }

    /// Returns the full content, from cache when allowed and fresh.
    ///
    /// On provider failure with `use_cache`, serves the last content seen even
    /// if it has expired. Returns `None` when nothing usable exists.
    pub async fn get_all_content(&self, use_cache: bool) -> Option<CmsContent> {
        let key = self.cache_key();

        if use_cache {
            if let Some(content) = self.cached(&key).await {
                tracing::debug!("CMS: Using cached content");
                return Some(content);
            }
        }

        match self.job.run().await {
            Ok(Some(content)) => {
                match serde_json::to_value(&content) {
                    Ok(value) => {
                        self.cache.set(&key, value, self.ttl).await;
                        tracing::debug!("CMS: Content cached successfully");
                    }
                    Err(e) => tracing::error!("CMS: Failed to encode content for cache: {}", e),
                }
                Some(content)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("CMS: Error fetching content from {}: {}", self.provider_name(), e);
                if !use_cache {
                    return None;
                }
                let stale = match self.cached(&key).await {
                    Some(content) => Some(content),
                    None => self.last_known_good(),
                };
                if stale.is_some() {
                    tracing::warn!("CMS: Using stale content due to error");
                }
                stale
            }
        }
    }

    /// Drops every cached entry and the stale-fallback snapshot.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        *self.job.snapshot.write().unwrap_or_else(|p| p.into_inner()) = None;
        tracing::info!("CMS: Cache cleared");
    }

    pub async fn refresh_content(&self) -> Option<CmsContent> {
        self.clear_cache().await;
        self.get_all_content(false).await
    }

    pub async fn warm_up_cache(&self) -> bool {
        let job = self.job.clone();
        self.warmer
            .warm_up(move || job.run_for_cache(), &self.cache_key(), self.ttl)
            .await
    }

    pub fn start_auto_warmup(&self, interval: Duration) {
        let job = self.job.clone();
        self.warmer.start_auto_warmup(
            move || job.clone().run_for_cache(),
            self.cache_key(),
            interval,
            self.ttl,
        );
    }

    pub fn stop_auto_warmup(&self) {
        self.warmer.stop_auto_warmup();
    }

    /// Performs an uncached fetch and reports the outcome. Never fails.
    pub async fn health_check(&self) -> CmsHealth {
        let content = self.get_all_content(false).await;
        let last_fetch = self
            .job
            .snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|s| s.fetched_at);

        CmsHealth {
            status: if content.is_some() {
                HealthStatus::Ok
            } else {
                HealthStatus::Error
            },
            provider: self.provider_name().to_string(),
            last_fetch,
            cache_stats: self.cache.stats(),
        }
    }
}

//! Cached entry point over every provider adapter.
//!
//! Typed calls go through the [`ResponseCache`] with deterministic keys and
//! the provider's cache TTL, so concurrent identical requests share one
//! upstream call. [`Gateway::brand`] scopes keys to one brand so its data
//! can be dropped in a single invalidation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::{
    AdapterCore, EndpointSpec, FacebookAdapter, InstagramAdapter, NlpAdapter, ProviderAdapter, RequestParams, SimilarWebAdapter,
};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::cache::{CacheBackend, CacheKey, ResponseCache};
use crate::config::GatewayConfig;
use crate::error::{CacheError, ConfigError, GatewayError};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::throttling::BudgetRegistry;
use crate::{CanonicalRecord, ProviderId, RecordKind, Review, SentimentResult, SeoMetrics, SocialPost, TrafficMetrics};

/// Builder for a [`Gateway`].
///
/// Defaults to the reqwest transport, tracing audit, an in-memory cache and
/// the process-wide budget registry, so adapters of separate gateways that
/// target the same host still share one rate budget.
///
/// ```rust,ignore
/// use brandpulse_gateway::{GatewayBuilder, GatewayConfig};
///
/// let gateway = GatewayBuilder::new(GatewayConfig::from_env()?).build()?;
/// let traffic = gateway.brand("42").traffic("example.com").await?;
/// ```
pub struct GatewayBuilder {
    config: GatewayConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    audit: Option<Arc<dyn AuditSink>>,
    cache: Option<ResponseCache>,
    budgets: Option<BudgetRegistry>,
    shutdown: CancellationToken,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            http_client: None,
            audit: None,
            cache: None,
            budgets: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(GatewayConfig::from_env()?))
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses `backend` with a one hour default TTL.
    pub fn with_cache_backend(self, backend: Arc<dyn CacheBackend>) -> Self {
        self.with_cache(ResponseCache::new(backend, Duration::from_secs(3_600)))
    }

    /// Private budgets instead of the process-wide registry.
    pub fn with_budget_registry(mut self, budgets: BudgetRegistry) -> Self {
        self.budgets = Some(budgets);
        self
    }

    /// Cancels every in-flight call once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn build(self) -> Result<Gateway, ConfigError> {
        for provider in ProviderId::ALL {
            self.config.provider(provider).policy.validate()?;
        }

        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let budgets = match &self.budgets {
            Some(budgets) => budgets,
            None => BudgetRegistry::global(),
        };

        let core = |provider: ProviderId, endpoints: &'static [EndpointSpec]| {
            AdapterCore::new(
                self.config.provider(provider),
                endpoints,
                Arc::clone(&http_client),
                Arc::clone(&audit),
                budgets,
            )
            .with_shutdown(self.shutdown.clone())
        };

        let gateway = Gateway {
            similarweb: Arc::new(SimilarWebAdapter::new(core(
                ProviderId::SimilarWeb,
                SimilarWebAdapter::ENDPOINTS,
            ))),
            instagram: Arc::new(InstagramAdapter::new(core(ProviderId::Instagram, InstagramAdapter::ENDPOINTS))),
            facebook: Arc::new(FacebookAdapter::new(core(ProviderId::Facebook, FacebookAdapter::ENDPOINTS))),
            nlp: Arc::new(NlpAdapter::new(core(ProviderId::Nlp, NlpAdapter::ENDPOINTS))),
            cache: self.cache.unwrap_or_else(ResponseCache::in_memory),
            shutdown: self.shutdown,
        };

        tracing::info!(
            configured = ?self.config.configured_providers(),
            "gateway ready"
        );
        Ok(gateway)
    }
}

/// Adapter registry with a shared response cache.
#[derive(Debug, Clone)]
pub struct Gateway {
    similarweb: Arc<SimilarWebAdapter>,
    instagram: Arc<InstagramAdapter>,
    facebook: Arc<FacebookAdapter>,
    nlp: Arc<NlpAdapter>,
    cache: ResponseCache,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn similarweb(&self) -> &SimilarWebAdapter {
        &self.similarweb
    }

    pub fn instagram(&self) -> &InstagramAdapter {
        &self.instagram
    }

    pub fn facebook(&self) -> &FacebookAdapter {
        &self.facebook
    }

    pub fn nlp(&self) -> &NlpAdapter {
        &self.nlp
    }

    pub fn adapter(&self, provider: ProviderId) -> Arc<dyn ProviderAdapter> {
        match provider {
            ProviderId::SimilarWeb => Arc::clone(&self.similarweb) as Arc<dyn ProviderAdapter>,
            ProviderId::Instagram => Arc::clone(&self.instagram) as Arc<dyn ProviderAdapter>,
            ProviderId::Facebook => Arc::clone(&self.facebook) as Arc<dyn ProviderAdapter>,
            ProviderId::Nlp => Arc::clone(&self.nlp) as Arc<dyn ProviderAdapter>,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Calls cached outside any brand scope.
    pub fn global(&self) -> BrandScope<'_> {
        BrandScope {
            gateway: self,
            scope: None,
        }
    }

    /// Calls cached under `brand:<id>`, with the id percent-encoded so no
    /// brand's prefix can cover another's.
    pub fn brand(&self, brand_id: impl AsRef<str>) -> BrandScope<'_> {
        BrandScope {
            gateway: self,
            scope: Some(format!("brand:{}", urlencoding::encode(brand_id.as_ref()))),
        }
    }

    /// Drops every cached entry of one brand; returns how many.
    pub async fn invalidate_brand(&self, brand_id: &str) -> Result<usize, CacheError> {
        self.brand(brand_id).invalidate().await
    }

    /// Cancels in-flight and future upstream calls.
    pub fn shutdown(&self) {
        tracing::info!("gateway shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn cache_ttl(&self, provider: ProviderId) -> Duration {
        match provider {
            ProviderId::SimilarWeb => self.similarweb.core().policy().cache_ttl,
            ProviderId::Instagram => self.instagram.core().policy().cache_ttl,
            ProviderId::Facebook => self.facebook.core().policy().cache_ttl,
            ProviderId::Nlp => self.nlp.core().policy().cache_ttl,
        }
    }

    pub async fn traffic(&self, domain: &str) -> Result<Option<TrafficMetrics>, CacheError> {
        self.global().traffic(domain).await
    }

    pub async fn seo(&self, domain: &str) -> Result<Option<SeoMetrics>, CacheError> {
        self.global().seo(domain).await
    }

    pub async fn sentiment(&self, text: &str) -> Result<Option<SentimentResult>, CacheError> {
        self.global().sentiment(text).await
    }

    pub async fn records(
        &self,
        provider: ProviderId,
        endpoint: &str,
        params: RequestParams,
        kind: RecordKind,
    ) -> Result<Vec<CanonicalRecord>, CacheError> {
        self.global().records(provider, endpoint, params, kind).await
    }
}

/// Cached calls whose keys share one scope prefix.
#[derive(Debug, Clone)]
pub struct BrandScope<'a> {
    gateway: &'a Gateway,
    scope: Option<String>,
}

impl BrandScope<'_> {
    /// Key prefix shared by this scope's entries; empty when unscoped.
    pub fn prefix(&self) -> String {
        self.scope
            .as_deref()
            .map(|scope| format!("{scope}:"))
            .unwrap_or_default()
    }

    /// Drops this scope's entries. Unscoped entries are left alone.
    pub async fn invalidate(&self) -> Result<usize, CacheError> {
        match &self.scope {
            Some(_) => self.gateway.cache.invalidate_prefix(&self.prefix()).await,
            None => Ok(0),
        }
    }

    /// Renders `key` under this scope.
    pub fn key(&self, key: CacheKey) -> String {
        match &self.scope {
            Some(scope) => key.scoped(scope.clone()).render(),
            None => key.render(),
        }
    }

    async fn cached<T, F, Fut>(&self, provider: ProviderId, key: CacheKey, compute: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let ttl = self.gateway.cache_ttl(provider);
        self.gateway.cache.get_or_compute(&self.key(key), ttl, compute).await
    }

    pub async fn traffic(&self, domain: &str) -> Result<Option<TrafficMetrics>, CacheError> {
        let adapter = Arc::clone(&self.gateway.similarweb);
        let domain_owned = domain.to_owned();
        let key = CacheKey::new("similarweb/traffic").param("domain", domain);
        self.cached(ProviderId::SimilarWeb, key, move || async move {
            let raw = adapter.fetch_traffic(&domain_owned).await?;
            Ok::<_, GatewayError>(SimilarWebAdapter::normalize_traffic(&raw))
        })
        .await
    }

    pub async fn seo(&self, domain: &str) -> Result<Option<SeoMetrics>, CacheError> {
        let adapter = Arc::clone(&self.gateway.similarweb);
        let domain_owned = domain.to_owned();
        let key = CacheKey::new("similarweb/seo").param("domain", domain);
        self.cached(ProviderId::SimilarWeb, key, move || async move {
            let raw = adapter.fetch_seo(&domain_owned).await?;
            Ok::<_, GatewayError>(SimilarWebAdapter::normalize_seo(&raw))
        })
        .await
    }

    pub async fn instagram_posts(&self, user_id: &str) -> Result<Vec<SocialPost>, CacheError> {
        let adapter = Arc::clone(&self.gateway.instagram);
        let user_id_owned = user_id.to_owned();
        let key = CacheKey::new("instagram/user/medias").param("user_id", user_id);
        self.cached(ProviderId::Instagram, key, move || async move {
            let raw = adapter.fetch_user_medias(&user_id_owned).await?;
            Ok::<_, GatewayError>(InstagramAdapter::normalize_posts(&raw))
        })
        .await
    }

    pub async fn instagram_comments(&self, media_id: &str) -> Result<Vec<Review>, CacheError> {
        let adapter = Arc::clone(&self.gateway.instagram);
        let media_id_owned = media_id.to_owned();
        let key = CacheKey::new("instagram/media/comments").param("page_id", media_id);
        self.cached(ProviderId::Instagram, key, move || async move {
            let raw = adapter.fetch_media_comments(&media_id_owned, false).await?;
            Ok::<_, GatewayError>(InstagramAdapter::normalize_comments(&raw))
        })
        .await
    }

    pub async fn facebook_posts(&self, page_id: &str) -> Result<Vec<SocialPost>, CacheError> {
        let adapter = Arc::clone(&self.gateway.facebook);
        let page_id_owned = page_id.to_owned();
        let key = CacheKey::new("facebook/page/posts").param("page_id", page_id);
        self.cached(ProviderId::Facebook, key, move || async move {
            let raw = adapter.fetch_page_posts(&page_id_owned).await?;
            Ok::<_, GatewayError>(FacebookAdapter::normalize_posts(&raw))
        })
        .await
    }

    pub async fn facebook_comments(&self, post_id: &str) -> Result<Vec<Review>, CacheError> {
        let adapter = Arc::clone(&self.gateway.facebook);
        let post_id_owned = post_id.to_owned();
        let key = CacheKey::new("facebook/post/comments").param("post_id", post_id);
        self.cached(ProviderId::Facebook, key, move || async move {
            let raw = adapter.fetch_post_comments(&post_id_owned).await?;
            Ok::<_, GatewayError>(FacebookAdapter::normalize_reviews(&raw))
        })
        .await
    }

    pub async fn facebook_reviews(&self, page_id: &str) -> Result<Vec<Review>, CacheError> {
        let adapter = Arc::clone(&self.gateway.facebook);
        let page_id_owned = page_id.to_owned();
        let key = CacheKey::new("facebook/page/reviews").param("page_id", page_id);
        self.cached(ProviderId::Facebook, key, move || async move {
            let raw = adapter.fetch_page_reviews(&page_id_owned).await?;
            Ok::<_, GatewayError>(FacebookAdapter::normalize_reviews(&raw))
        })
        .await
    }

    pub async fn sentiment(&self, text: &str) -> Result<Option<SentimentResult>, CacheError> {
        let adapter = Arc::clone(&self.gateway.nlp);
        let text_owned = text.to_owned();
        let key = CacheKey::new("nlp/sentiment").param("text", text);
        self.cached(ProviderId::Nlp, key, move || async move {
            let raw = adapter.fetch_sentiment(&text_owned, None).await?;
            Ok::<_, GatewayError>(NlpAdapter::normalize_sentiment(&raw))
        })
        .await
    }

    /// Any endpoint of any provider, normalized to `kind`.
    pub async fn records(
        &self,
        provider: ProviderId,
        endpoint: &str,
        params: RequestParams,
        kind: RecordKind,
    ) -> Result<Vec<CanonicalRecord>, CacheError> {
        let adapter = self.gateway.adapter(provider);
        let endpoint_owned = endpoint.to_owned();
        let key = CacheKey::from_params(format!("{provider}/{endpoint}"), params.pairs()).param("_kind", kind.as_str());
        self.cached(provider, key, move || async move {
            let raw = adapter.fetch_raw(&endpoint_owned, params).await?;
            Ok::<_, GatewayError>(adapter.normalize(kind, &raw))
        })
        .await
    }
}

use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::throttling::BudgetConfig;
use crate::ProviderId;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Per-provider call policy: where to call, how fast and how persistently.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    /// Base URL including trailing slash; endpoint paths are appended to it.
    pub base_url: String,
    /// Value of the marketplace host header; also keys the shared budget.
    pub api_host: String,
    pub budget: BudgetConfig,
    pub retry: RetryPolicy,
    /// Timeout applied to every individual attempt.
    pub request_timeout: Duration,
    /// Retry 4xx answers (other than 429) instead of failing fast.
    pub retry_client_errors: bool,
    pub cache_ttl: Duration,
}

impl ProviderPolicy {
    fn rapidapi(provider_id: ProviderId, host: &str, path_prefix: &str) -> Self {
        Self {
            provider_id,
            base_url: format!("https://{host}/{path_prefix}"),
            api_host: host.to_owned(),
            budget: BudgetConfig::default(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_TIMEOUT,
            retry_client_errors: false,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn similarweb_default() -> Self {
        Self::rapidapi(ProviderId::SimilarWeb, "similarweb-insights.p.rapidapi.com", "")
    }

    pub fn instagram_default() -> Self {
        Self::rapidapi(ProviderId::Instagram, "instagram-premium-api-2023.p.rapidapi.com", "v2/")
    }

    pub fn facebook_default() -> Self {
        Self::rapidapi(ProviderId::Facebook, "facebook-scraper3.p.rapidapi.com", "")
    }

    pub fn nlp_default() -> Self {
        Self::rapidapi(ProviderId::Nlp, "japerk-text-processing.p.rapidapi.com", "")
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::SimilarWeb => Self::similarweb_default(),
            ProviderId::Instagram => Self::instagram_default(),
            ProviderId::Facebook => Self::facebook_default(),
            ProviderId::Nlp => Self::nlp_default(),
        }
    }

    /// Points the provider at another base URL, e.g. a local mock.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = api_host.into();
        self
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_client_errors(mut self, retry: bool) -> Self {
        self.retry_client_errors = retry;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.budget.is_valid() {
            return Err(ConfigError::InvalidBudget {
                provider: self.provider_id,
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                provider: self.provider_id,
            });
        }
        Ok(())
    }

    /// Full URL for an endpoint path relative to the base URL.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

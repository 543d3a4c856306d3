//! Gateway configuration assembled from provider defaults and environment
//! variables.
//!
//! Per provider `<P>` (`SIMILARWEB`, `INSTAGRAM`, `FACEBOOK`, `NLP`):
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `BRANDPULSE_<P>_API_KEY` | marketplace key; falls back to `RAPIDAPI_KEY` |
//! | `BRANDPULSE_<P>_API_HOST` | host header and budget key |
//! | `BRANDPULSE_<P>_BASE_URL` | base URL override |
//! | `BRANDPULSE_<P>_RATE_CAPACITY` | token bucket capacity |
//! | `BRANDPULSE_<P>_RATE_PER_SECOND` | token refill rate |
//! | `BRANDPULSE_<P>_TIMEOUT_MS` | per-attempt timeout |
//! | `BRANDPULSE_<P>_CACHE_TTL_SECS` | cache TTL for the provider's results |
//! | `BRANDPULSE_<P>_RETRY_CLIENT_ERRORS` | retry 4xx answers (`true`/`false`) |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::http_client::HttpAuth;
use crate::provider_policy::ProviderPolicy;
use crate::ProviderId;

const ENV_PREFIX: &str = "BRANDPULSE";
const SHARED_KEY_VAR: &str = "RAPIDAPI_KEY";

/// API key for one provider. Never printed.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ProviderCredentials {
    api_key: String,
}

impl ProviderCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Marketplace key/host header pair for requests to `host`.
    pub fn auth_for(&self, host: &str) -> HttpAuth {
        HttpAuth::rapidapi(self.api_key.clone(), host)
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &if self.is_configured() { "<redacted>" } else { "<unset>" })
            .finish()
    }
}

/// Policy and credentials for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub policy: ProviderPolicy,
    pub credentials: ProviderCredentials,
}

impl ProviderConfig {
    pub fn new(policy: ProviderPolicy, credentials: ProviderCredentials) -> Self {
        Self { policy, credentials }
    }

    pub fn default_for(provider: ProviderId) -> Self {
        Self::new(ProviderPolicy::default_for(provider), ProviderCredentials::default())
    }
}

/// Configuration of every provider reachable through the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    similarweb: ProviderConfig,
    instagram: ProviderConfig,
    facebook: ProviderConfig,
    nlp: ProviderConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            similarweb: ProviderConfig::default_for(ProviderId::SimilarWeb),
            instagram: ProviderConfig::default_for(ProviderId::Instagram),
            facebook: ProviderConfig::default_for(ProviderId::Facebook),
            nlp: ProviderConfig::default_for(ProviderId::Nlp),
        }
    }
}

impl GatewayConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let shared_key = non_empty(lookup(SHARED_KEY_VAR));
        let mut config = Self::default();

        for provider in ProviderId::ALL {
            let var = |suffix: &str| format!("{ENV_PREFIX}_{}_{suffix}", provider.env_token());
            let read = |suffix: &str| {
                let name = var(suffix);
                non_empty(lookup(&name)).map(|value| (name, value))
            };

            let mut policy = ProviderPolicy::default_for(provider);

            if let Some((_, host)) = read("API_HOST") {
                policy = policy.with_api_host(host);
            }
            if let Some((_, base_url)) = read("BASE_URL") {
                policy = policy.with_base_url(base_url);
            }

            let mut budget = policy.budget;
            if let Some((name, value)) = read("RATE_CAPACITY") {
                budget.capacity = parse_var(&name, &value)?;
            }
            if let Some((name, value)) = read("RATE_PER_SECOND") {
                budget.refill_per_second = parse_var(&name, &value)?;
            }
            policy = policy.with_budget(budget);

            if let Some((name, value)) = read("TIMEOUT_MS") {
                policy = policy.with_request_timeout(Duration::from_millis(parse_var(&name, &value)?));
            }
            if let Some((name, value)) = read("CACHE_TTL_SECS") {
                policy = policy.with_cache_ttl(Duration::from_secs(parse_var(&name, &value)?));
            }
            if let Some((name, value)) = read("RETRY_CLIENT_ERRORS") {
                policy = policy.with_retry_client_errors(parse_bool(&name, &value)?);
            }

            policy.validate()?;

            let key = read("API_KEY")
                .map(|(_, value)| value)
                .or_else(|| shared_key.clone())
                .unwrap_or_default();

            *config.provider_mut(provider) = ProviderConfig::new(policy, ProviderCredentials::new(key));
        }

        Ok(config)
    }

    pub fn provider(&self, provider: ProviderId) -> &ProviderConfig {
        match provider {
            ProviderId::SimilarWeb => &self.similarweb,
            ProviderId::Instagram => &self.instagram,
            ProviderId::Facebook => &self.facebook,
            ProviderId::Nlp => &self.nlp,
        }
    }

    fn provider_mut(&mut self, provider: ProviderId) -> &mut ProviderConfig {
        match provider {
            ProviderId::SimilarWeb => &mut self.similarweb,
            ProviderId::Instagram => &mut self.instagram,
            ProviderId::Facebook => &mut self.facebook,
            ProviderId::Nlp => &mut self.nlp,
        }
    }

    /// Replaces the policy of `policy.provider_id`, keeping its credentials.
    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        let provider = policy.provider_id;
        self.provider_mut(provider).policy = policy;
        self
    }

    pub fn with_api_key(mut self, provider: ProviderId, api_key: impl Into<String>) -> Self {
        self.provider_mut(provider).credentials = ProviderCredentials::new(api_key);
        self
    }

    /// Providers that have an API key.
    pub fn configured_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|provider| self.provider(*provider).credentials.is_configured())
            .collect()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|error| ConfigError::InvalidVar {
        name: name.to_owned(),
        value: value.to_owned(),
        reason: error.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVar {
            name: name.to_owned(),
            value: value.to_owned(),
            reason: String::from("expected true or false"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttling::BudgetConfig;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults_without_keys() {
        let config = GatewayConfig::from_lookup(lookup(&[])).expect("defaults are valid");

        assert!(config.configured_providers().is_empty());
        assert_eq!(
            config.provider(ProviderId::Facebook).policy,
            ProviderPolicy::facebook_default()
        );
    }

    #[test]
    fn provider_variables_override_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("BRANDPULSE_SIMILARWEB_API_KEY", "sw-key"),
            ("BRANDPULSE_SIMILARWEB_RATE_CAPACITY", "5"),
            ("BRANDPULSE_SIMILARWEB_RATE_PER_SECOND", "0.5"),
            ("BRANDPULSE_SIMILARWEB_TIMEOUT_MS", "2500"),
            ("BRANDPULSE_SIMILARWEB_CACHE_TTL_SECS", "60"),
            ("BRANDPULSE_SIMILARWEB_RETRY_CLIENT_ERRORS", "true"),
        ]))
        .expect("valid config");

        let similarweb = config.provider(ProviderId::SimilarWeb);
        assert_eq!(similarweb.credentials.api_key(), "sw-key");
        assert_eq!(similarweb.policy.budget, BudgetConfig::new(5, 0.5));
        assert_eq!(similarweb.policy.request_timeout, Duration::from_millis(2500));
        assert_eq!(similarweb.policy.cache_ttl, Duration::from_secs(60));
        assert!(similarweb.policy.retry_client_errors);
        assert_eq!(config.configured_providers(), vec![ProviderId::SimilarWeb]);
    }

    #[test]
    fn shared_key_applies_to_providers_without_their_own() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("RAPIDAPI_KEY", "shared"),
            ("BRANDPULSE_NLP_API_KEY", "nlp-only"),
        ]))
        .expect("valid config");

        assert_eq!(config.provider(ProviderId::Instagram).credentials.api_key(), "shared");
        assert_eq!(config.provider(ProviderId::Nlp).credentials.api_key(), "nlp-only");
        assert_eq!(config.configured_providers().len(), 4);
    }

    #[test]
    fn malformed_values_are_reported_with_variable_name() {
        let err = GatewayConfig::from_lookup(lookup(&[("BRANDPULSE_FACEBOOK_RATE_CAPACITY", "lots")]))
            .expect_err("capacity must be numeric");

        match err {
            ConfigError::InvalidVar { name, value, .. } => {
                assert_eq!(name, "BRANDPULSE_FACEBOOK_RATE_CAPACITY");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[("BRANDPULSE_NLP_RATE_CAPACITY", "0")]))
            .expect_err("capacity must be positive");
        assert_eq!(err, ConfigError::InvalidBudget { provider: ProviderId::Nlp });
    }

    #[test]
    fn replacing_a_policy_keeps_the_provider_key() {
        let config = GatewayConfig::default()
            .with_api_key(ProviderId::Instagram, "ig-key")
            .with_policy(ProviderPolicy::instagram_default().with_budget(BudgetConfig::new(7, 3.0)));

        let instagram = config.provider(ProviderId::Instagram);
        assert_eq!(instagram.policy.budget, BudgetConfig::new(7, 3.0));
        assert_eq!(instagram.credentials.api_key(), "ig-key");
        assert_eq!(config.provider(ProviderId::Nlp).policy, ProviderPolicy::nlp_default());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let rendered = format!("{:?}", ProviderCredentials::new("top-secret"));
        assert!(!rendered.contains("top-secret"));
    }
}

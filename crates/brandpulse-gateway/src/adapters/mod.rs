//! Provider adapters: one per upstream, sharing [`AdapterCore`] for request
//! dispatch, retry, budget and audit.

mod facebook;
mod instagram;
mod nlp;
mod payload;
mod similarweb;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::audit::{AuditAction, AuditEvent, AuditSink, TracingAuditSink};
use crate::config::{GatewayConfig, ProviderConfig};
use crate::error::{CallError, GatewayError};
use crate::http_client::{HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::provider_policy::ProviderPolicy;
use crate::retry::{CallAttempt, RetryController};
use crate::throttling::BudgetRegistry;
use crate::{CanonicalRecord, ProviderId, RecordKind};

pub use facebook::FacebookAdapter;
pub use instagram::InstagramAdapter;
pub use nlp::NlpAdapter;
pub use payload::RawPayload;
pub use similarweb::SimilarWebAdapter;

/// Future returned by adapter fetch operations.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Declaration of one upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    pub name: &'static str,
    pub method: HttpMethod,
    /// Path relative to the provider's base URL.
    pub path: &'static str,
    /// Parameters that must be present and non-blank.
    pub required: &'static [&'static str],
}

impl EndpointSpec {
    pub const fn get(name: &'static str, path: &'static str, required: &'static [&'static str]) -> Self {
        Self {
            name,
            method: HttpMethod::Get,
            path,
            required,
        }
    }

    pub const fn post(name: &'static str, path: &'static str, required: &'static [&'static str]) -> Self {
        Self {
            name,
            method: HttpMethod::Post,
            path,
            required,
        }
    }
}

/// Query or form parameters of one request, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams(Vec<(String, String)>);

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name`, replacing an earlier value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// First required parameter that is absent or blank.
    pub fn missing(&self, required: &[&'static str]) -> Option<&'static str> {
        required
            .iter()
            .copied()
            .find(|name| self.get(name).map_or(true, |value| value.trim().is_empty()))
    }
}

impl<K, V> FromIterator<(K, V)> for RequestParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |params, (name, value)| params.with(name, value))
    }
}

/// Uniform view over every provider adapter.
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    fn endpoints(&self) -> &'static [EndpointSpec];

    /// Calls `endpoint` until it answers, fails terminally or `cancel` fires.
    fn fetch_raw_cancellable<'a>(
        &'a self,
        endpoint: &'a str,
        params: RequestParams,
        cancel: &'a CancellationToken,
    ) -> AdapterFuture<'a, RawPayload>;

    fn fetch_raw<'a>(&'a self, endpoint: &'a str, params: RequestParams) -> AdapterFuture<'a, RawPayload> {
        Box::pin(async move {
            let cancel = CancellationToken::new();
            self.fetch_raw_cancellable(endpoint, params, &cancel).await
        })
    }

    /// Canonical records of `kind` found in `raw`. Empty means no usable
    /// data, including when the provider does not produce `kind`.
    fn normalize(&self, kind: RecordKind, raw: &RawPayload) -> Vec<CanonicalRecord>;
}

/// Request plumbing shared by the concrete adapters.
#[derive(Clone)]
pub struct AdapterCore {
    provider: ProviderId,
    policy: ProviderPolicy,
    auth: HttpAuth,
    endpoints: &'static [EndpointSpec],
    http_client: Arc<dyn HttpClient>,
    controller: RetryController,
    audit: Arc<dyn AuditSink>,
}

impl AdapterCore {
    /// Binds the provider to the budget shared by every adapter targeting
    /// the same host in `budgets`.
    pub fn new(
        config: &ProviderConfig,
        endpoints: &'static [EndpointSpec],
        http_client: Arc<dyn HttpClient>,
        audit: Arc<dyn AuditSink>,
        budgets: &BudgetRegistry,
    ) -> Self {
        let policy = config.policy.clone();
        let provider = policy.provider_id;
        let budget = budgets.budget_for(provider, &policy.api_host, policy.budget);
        let controller = RetryController::new(provider, policy.retry, budget, Arc::clone(&audit));

        Self {
            provider,
            auth: config.credentials.auth_for(&policy.api_host),
            policy,
            endpoints,
            http_client,
            controller,
            audit,
        }
    }

    /// Production wiring: reqwest transport, tracing audit, process-wide budgets.
    pub fn from_gateway_config(config: &GatewayConfig, provider: ProviderId, endpoints: &'static [EndpointSpec]) -> Self {
        Self::new(
            config.provider(provider),
            endpoints,
            Arc::new(ReqwestHttpClient::new()),
            Arc::new(TracingAuditSink),
            BudgetRegistry::global(),
        )
    }

    /// Cancels every call of this adapter once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.controller = self.controller.with_shutdown(shutdown);
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    pub fn endpoints(&self) -> &'static [EndpointSpec] {
        self.endpoints
    }

    pub fn controller(&self) -> &RetryController {
        &self.controller
    }

    pub fn endpoint(&self, name: &str) -> Result<&'static EndpointSpec, GatewayError> {
        self.endpoints
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| GatewayError::invalid_request(self.provider, format!("unknown endpoint '{name}'")))
    }

    pub async fn fetch(&self, endpoint: &str, params: &RequestParams) -> Result<RawPayload, GatewayError> {
        self.fetch_cancellable(endpoint, params, &CancellationToken::new())
            .await
    }

    /// Validates the request, then runs it through the retry controller.
    /// Invalid requests never touch the budget.
    pub async fn fetch_cancellable(
        &self,
        endpoint: &str,
        params: &RequestParams,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, GatewayError> {
        let result = match self.validate(endpoint, params) {
            Ok(spec) => {
                let attempt = CallAttempt::new(
                    spec.name,
                    spec.method,
                    self.policy.endpoint_url(spec.path),
                    params.pairs().to_vec(),
                );
                tracing::debug!(
                    provider = %self.provider,
                    endpoint = spec.name,
                    method = %spec.method,
                    "dispatching provider request"
                );
                self.controller
                    .execute_cancellable(attempt, cancel, |attempt| self.send(attempt))
                    .await
            }
            Err(error) => Err(error),
        };

        self.record_outcome(endpoint, &result);
        result
    }

    fn validate(&self, endpoint: &str, params: &RequestParams) -> Result<&'static EndpointSpec, GatewayError> {
        let spec = self.endpoint(endpoint)?;
        if let Some(missing) = params.missing(spec.required) {
            return Err(GatewayError::invalid_request(
                self.provider,
                format!("endpoint '{}' requires parameter '{missing}'", spec.name),
            ));
        }
        Ok(spec)
    }

    fn send(&self, attempt: &CallAttempt) -> impl Future<Output = Result<RawPayload, CallError>> + Send + 'static {
        let request = self.build_request(attempt);
        let client = Arc::clone(&self.http_client);
        let timeout = self.policy.request_timeout;
        let retry_client_errors = self.policy.retry_client_errors;

        async move {
            let response = match tokio::time::timeout(timeout, client.execute(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => {
                    return Err(CallError::transport(error.message()).with_retryable(error.retryable()))
                }
                Err(_) => {
                    return Err(CallError::transport(format!(
                        "attempt timed out after {}ms",
                        timeout.as_millis()
                    )))
                }
            };
            classify_response(response, retry_client_errors)
        }
    }

    fn build_request(&self, attempt: &CallAttempt) -> HttpRequest {
        let timeout_ms = u64::try_from(self.policy.request_timeout.as_millis()).unwrap_or(u64::MAX);
        let request = HttpRequest::new(attempt.method, attempt.url.clone())
            .with_header("accept", "application/json")
            .with_auth(&self.auth)
            .with_timeout_ms(timeout_ms);

        match attempt.method {
            HttpMethod::Get => request.with_query(&attempt.params),
            HttpMethod::Post => request.with_form(&attempt.params),
        }
    }

    fn record_outcome(&self, endpoint: &str, result: &Result<RawPayload, GatewayError>) {
        match result {
            Ok(payload) => {
                tracing::info!(
                    provider = %self.provider,
                    endpoint,
                    success_flag = payload.is_success(),
                    "provider fetch succeeded"
                );
                self.audit.record(
                    AuditEvent::new(self.provider, AuditAction::FetchSucceeded, endpoint)
                        .with_detail("success_flag", payload.is_success()),
                );
            }
            Err(GatewayError::Cancelled { attempts, .. }) => {
                tracing::debug!(provider = %self.provider, endpoint, attempts, "provider fetch cancelled");
            }
            Err(error) => {
                tracing::warn!(
                    provider = %self.provider,
                    endpoint,
                    attempts = error.attempts(),
                    code = error.code(),
                    %error,
                    "provider fetch failed"
                );
                let mut event = AuditEvent::new(self.provider, AuditAction::FetchFailed, endpoint)
                    .with_detail("code", error.code())
                    .with_detail("attempts", error.attempts())
                    .with_detail("error", error.to_string());
                if let Some(status) = error.last_cause().and_then(CallError::status) {
                    event = event.with_detail("status", status);
                }
                self.audit.record(event);
            }
        }
    }
}

impl std::fmt::Debug for AdapterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCore")
            .field("provider", &self.provider)
            .field("policy", &self.policy)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Maps one upstream answer onto the per-attempt error taxonomy.
fn classify_response(response: HttpResponse, retry_client_errors: bool) -> Result<RawPayload, CallError> {
    match response.status {
        200..=299 => serde_json::from_str(&response.body)
            .map(RawPayload::new)
            .map_err(|error| CallError::decode(format!("response body is not valid JSON: {error}"))),
        429 => Err(CallError::upstream_throttled(response.retry_after())),
        400..=499 => Err(
            CallError::upstream_client_error(response.status, &response.body).with_retryable(retry_client_errors),
        ),
        500..=599 => Err(CallError::upstream_server_error(response.status, &response.body)),
        status => Err(CallError::unexpected_status(status)),
    }
}

/// Wraps single-record normalizers for [`ProviderAdapter::normalize`].
fn one<T>(record: Option<T>, wrap: fn(T) -> CanonicalRecord) -> Vec<CanonicalRecord> {
    record.map(wrap).into_iter().collect()
}

fn many<T>(records: Vec<T>, wrap: fn(T) -> CanonicalRecord) -> Vec<CanonicalRecord> {
    records.into_iter().map(wrap).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::http_client::HttpError;

    /// Replays scripted responses in order and records every request.
    /// The last response repeats once the script runs out.
    #[derive(Debug)]
    pub struct ScriptedHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttpClient {
        pub fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn json(body: &str) -> Self {
            Self::new(vec![Ok(HttpResponse::ok_json(body))])
        }

        pub fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for ScriptedHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);

            let mut responses = self
                .responses
                .lock()
                .expect("response script should not be poisoned");
            let response = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
            .unwrap_or_else(|| Err(HttpError::new("no scripted response")));

            Box::pin(async move { response })
        }
    }

    pub fn core_for(
        provider: ProviderId,
        endpoints: &'static [EndpointSpec],
        client: Arc<ScriptedHttpClient>,
        audit: Arc<dyn AuditSink>,
    ) -> AdapterCore {
        let config = ProviderConfig::new(
            ProviderPolicy::default_for(provider).with_budget(crate::BudgetConfig::new(1_000, 1_000.0)),
            crate::ProviderCredentials::new("test-key"),
        );
        AdapterCore::new(&config, endpoints, client, audit, &BudgetRegistry::new())
    }
}

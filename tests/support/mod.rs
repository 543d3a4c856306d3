//! Shared fixtures for the behavior suites: a scripted transport and a
//! gateway wired to it with private budgets.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brandpulse_gateway::{
    BudgetConfig, BudgetRegistry, Gateway, GatewayConfig, HttpClient, HttpError, HttpRequest, HttpResponse,
    MemoryAuditSink, ProviderId, ProviderPolicy,
};

/// Replays responses in order, repeating the last one, and records every
/// request it sees.
#[derive(Debug)]
pub struct ScriptedHttpClient {
    responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Duration,
}

impl ScriptedHttpClient {
    pub fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn json(body: &str) -> Self {
        Self::new(vec![Ok(HttpResponse::ok_json(body))])
    }

    pub fn statuses(statuses: &[u16], final_body: &str) -> Self {
        let mut responses = statuses
            .iter()
            .map(|status| Ok(HttpResponse::new(*status, "upstream failure")))
            .collect::<Vec<_>>();
        responses.push(Ok(HttpResponse::ok_json(final_body)));
        Self::new(responses)
    }

    /// Holds every response for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("request log").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("request log").len()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.requests.lock().expect("request log").push(request);
        let response = {
            let mut responses = self.responses.lock().expect("response script");
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        }
        .unwrap_or_else(|| Err(HttpError::new("no scripted response")));
        let delay = self.delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }
}

/// Every provider keyed, with the same budget.
pub fn config(budget: BudgetConfig) -> GatewayConfig {
    ProviderId::ALL
        .into_iter()
        .fold(GatewayConfig::default(), |config, provider| {
            config
                .with_policy(ProviderPolicy::default_for(provider).with_budget(budget))
                .with_api_key(provider, "test-key")
        })
}

/// A budget roomy enough never to interfere.
pub fn roomy_budget() -> BudgetConfig {
    BudgetConfig::new(1_000, 1_000.0)
}

pub fn gateway(client: Arc<ScriptedHttpClient>, audit: Arc<MemoryAuditSink>) -> Gateway {
    gateway_with_config(config(roomy_budget()), client, audit)
}

pub fn gateway_with_config(
    config: GatewayConfig,
    client: Arc<ScriptedHttpClient>,
    audit: Arc<MemoryAuditSink>,
) -> Gateway {
    Gateway::builder(config)
        .with_http_client(client)
        .with_audit_sink(audit)
        .with_budget_registry(BudgetRegistry::new())
        .build()
        .expect("test config is valid")
}

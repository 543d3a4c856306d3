//! # Brandpulse Gateway
//!
//! Resilient data-acquisition gateway in front of the brandpulse upstream
//! providers: SimilarWeb website insights, Instagram and Facebook social
//! data, and a text-processing NLP service.
//!
//! ## Overview
//!
//! - **Rate budgets** per provider host, shared across adapters and callers
//! - **Bounded retries** with exponential backoff and `Retry-After` support
//! - **Provider adapters** that fetch raw payloads and normalize them into
//!   canonical records
//! - **Response cache** with TTLs, prefix invalidation and single-flight
//!   computation on miss
//! - **Audit trail** of every attempt and outcome, best-effort
//!
//! ## Feature Flags
//!
//! | Flag | Description |
//! |------|-------------|
//! | `default` | In-memory cache backend |
//! | `redis` | [`RedisCacheBackend`](cache::RedisCacheBackend) for a shared cache |
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (SimilarWeb, Instagram, Facebook, NLP) |
//! | [`audit`] | Audit events and sinks |
//! | [`cache`] | Response cache and backends |
//! | [`config`] | Environment-driven configuration |
//! | [`domain`] | Canonical records |
//! | [`error`] | Error taxonomy |
//! | [`gateway`] | Cached entry point and brand scopes |
//! | [`http_client`] | HTTP client abstraction |
//! | [`provider_policy`] | Per-provider endpoints, budgets and retry policy |
//! | [`retry`] | Retry controller |
//! | [`source`] | Provider identifiers |
//! | [`throttling`] | Token-bucket rate budgets |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brandpulse_gateway::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = brandpulse_gateway::GatewayBuilder::from_env()?.build()?;
//!
//!     if let Some(traffic) = gateway.brand("42").traffic("example.com").await? {
//!         println!("{} visits", traffic.visits);
//!     }
//!
//!     gateway.invalidate_brand("42").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Gateway        │────▶│ Response Cache   │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Provider        │────▶│ Audit Sink       │
//! │ Adapter         │     └──────────────────┘
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Retry           │────▶│ Rate Budget      │
//! │ Controller      │     └──────────────────┘
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ HTTP Client     │
//! │ (reqwest)       │
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Upstream calls fail with a [`GatewayError`] once retries are spent;
//! [`GatewayError::last_cause`] carries the [`CallError`] of the final
//! attempt:
//!
//! ```rust
//! use brandpulse_gateway::{CallErrorKind, GatewayError};
//!
//! fn handle_error(error: GatewayError) {
//!     match error.last_cause().map(|cause| cause.kind()) {
//!         Some(CallErrorKind::UpstreamThrottled) => {
//!             // Back off further
//!         }
//!         Some(CallErrorKind::UpstreamClientError) => {
//!             // Check credentials or parameters
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are read from environment variables only (never logged)
//! - All HTTP requests use TLS via reqwest

pub mod adapters;
pub mod audit;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod provider_policy;
pub mod retry;
pub mod source;
pub mod throttling;

// Adapter implementations
pub use adapters::{
    AdapterCore, EndpointSpec, FacebookAdapter, InstagramAdapter, NlpAdapter, ProviderAdapter, RawPayload,
    RequestParams, SimilarWebAdapter,
};

// Audit
pub use audit::{
    AuditAction, AuditEvent, AuditSink, AuditStore, AuditStoreError, BufferedAuditSink, MemoryAuditSink, TracingAuditSink,
};

// Caching
pub use cache::{CacheBackend, CacheKey, CacheStats, MemoryCacheBackend, ResponseCache};

// Configuration
pub use config::{GatewayConfig, ProviderConfig, ProviderCredentials};

// Domain models
pub use domain::{
    Author, CanonicalRecord, Engagement, RecordKind, Review, SentimentLabel, SentimentProbabilities,
    SentimentResult, SeoMetrics, SocialPost, TrafficMetrics, TrafficSources, UtcDateTime,
};

// Error types
pub use error::{CacheError, CallError, CallErrorKind, ConfigError, GatewayError, ValidationError};

// Gateway
pub use gateway::{BrandScope, Gateway, GatewayBuilder};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};

// Provider policies
pub use provider_policy::ProviderPolicy;

// Retry logic
pub use retry::{Backoff, RetryController, RetryPolicy};

// Source identifiers
pub use source::ProviderId;

// Throttling
pub use throttling::{BudgetConfig, BudgetRegistry, RateBudget, RateLimitExceeded};

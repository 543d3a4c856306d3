//! Bounded retry with exponential backoff around a single outbound call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::Clock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::error::{CallError, CallErrorKind, GatewayError};
use crate::http_client::HttpMethod;
use crate::throttling::RateBudget;
use crate::ProviderId;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Waits `multiplier * 2^k` after the k-th failed attempt, clamped to
    /// `[floor, ceiling]`.
    Exponential {
        multiplier: Duration,
        floor: Duration,
        ceiling: Duration,
        /// Whether to apply random jitter (+/- 50%) before clamping.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            multiplier: Duration::from_secs(1),
            floor: Duration::from_secs(4),
            ceiling: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay after the `failed_attempt`-th attempt (1-based) failed.
    pub fn delay(self, failed_attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                multiplier,
                floor,
                ceiling,
                jitter,
            } => {
                let exponent = failed_attempt.min(62) as i32;
                let mut seconds = multiplier.as_secs_f64() * 2_f64.powi(exponent);

                if jitter {
                    let spread = seconds * 0.5;
                    seconds += spread * (fastrand::f64() * 2.0 - 1.0);
                }

                let floor = floor.as_secs_f64();
                let ceiling = ceiling.as_secs_f64().max(floor);
                Duration::from_secs_f64(seconds.clamp(floor, ceiling))
            }
        }
    }

    pub fn ceiling(self) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { floor, ceiling, .. } => ceiling.max(floor),
        }
    }
}

/// Attempt budget and wait schedule for one logical call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound applied to upstream `Retry-After` hints.
    pub max_retry_after: Duration,
    /// Total time one call may spend waiting on local budget denials.
    pub max_budget_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
            max_retry_after: Duration::from_secs(60),
            max_budget_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, floor: Duration, ceiling: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                multiplier: Duration::from_secs(1),
                floor,
                ceiling,
                jitter: false,
            },
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before the next attempt, given the failure of attempt `failed_attempt`.
    ///
    /// Upstream `Retry-After` replaces the computed backoff.
    pub fn delay_after(&self, failed_attempt: u32, error: &CallError) -> Duration {
        match (error.kind(), error.retry_after()) {
            (CallErrorKind::UpstreamThrottled, Some(hint)) => hint.min(self.max_retry_after),
            _ => self.backoff.delay(failed_attempt),
        }
    }

    /// Wait after the `denial`-th (1-based) local budget denial of one call.
    ///
    /// The first denial waits for the next token; repeated denials back off
    /// on the regular schedule, never sooner than the next token.
    pub fn budget_delay(&self, denial: u32, time_to_token: Duration) -> Duration {
        if denial <= 1 {
            time_to_token.min(self.backoff.ceiling())
        } else {
            self.backoff.delay(denial - 1).max(time_to_token)
        }
    }
}

/// One outbound call as seen by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAttempt {
    pub endpoint: String,
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
    /// 1-based number of the attempt in progress; 0 before the first one.
    pub number: u32,
    pub last_error: Option<CallError>,
}

impl CallAttempt {
    pub fn new(
        endpoint: impl Into<String>,
        method: HttpMethod,
        url: impl Into<String>,
        params: Vec<(String, String)>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            url: url.into(),
            params,
            number: 0,
            last_error: None,
        }
    }
}

/// Why the retry loop gave up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    #[error("all {attempts} attempt(s) failed; last error: {last}")]
    Exhausted { attempts: u32, last: CallError },

    #[error("non-retryable failure on attempt {attempts}: {last}")]
    Permanent { attempts: u32, last: CallError },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl RetryFailure {
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Runs `call` until it succeeds, fails permanently, exhausts
/// `policy.max_attempts`, or `cancel` fires.
///
/// A token is taken from `budget` before every attempt. A denial does not
/// consume an attempt: the call waits per [`RetryPolicy::budget_delay`] until
/// `policy.max_budget_wait` is spent. Attempts are strictly sequential and no
/// attempt starts after cancellation. `on_failure` observes every failed
/// attempt and every denial.
pub async fn execute_with_retry<C, T, F, Fut, O>(
    policy: &RetryPolicy,
    budget: &RateBudget<C>,
    cancel: &CancellationToken,
    mut attempt: CallAttempt,
    mut on_failure: O,
    mut call: F,
) -> Result<T, RetryFailure>
where
    C: Clock,
    F: FnMut(&CallAttempt) -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
    O: FnMut(&CallAttempt, &CallError),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut denials = 0_u32;
    let mut budget_waited = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryFailure::Cancelled {
                attempts: attempt.number,
            });
        }

        attempt.number += 1;
        tracing::debug!(
            endpoint = %attempt.endpoint,
            attempt = attempt.number,
            max_attempts,
            "dispatching upstream attempt"
        );

        if let Err(denied) = budget.try_acquire() {
            let time_to_token = denied.retry_in;
            let error = CallError::from(denied);
            on_failure(&attempt, &error);
            attempt.number -= 1;
            denials += 1;

            let delay = policy.budget_delay(denials, time_to_token);
            if budget_waited + delay > policy.max_budget_wait {
                tracing::warn!(
                    endpoint = %attempt.endpoint,
                    denials,
                    waited_ms = budget_waited.as_millis() as u64,
                    "local rate budget wait exhausted"
                );
                return Err(RetryFailure::Exhausted {
                    attempts: attempt.number,
                    last: error,
                });
            }
            budget_waited += delay;
            tracing::debug!(
                endpoint = %attempt.endpoint,
                denials,
                delay_ms = delay.as_millis() as u64,
                "local rate budget denied attempt"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryFailure::Cancelled { attempts: attempt.number });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryFailure::Cancelled { attempts: attempt.number });
            }
            result = call(&attempt) => result,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        on_failure(&attempt, &error);

        if !error.retryable() {
            tracing::warn!(
                endpoint = %attempt.endpoint,
                attempt = attempt.number,
                code = error.code(),
                "permanent upstream failure"
            );
            return Err(RetryFailure::Permanent {
                attempts: attempt.number,
                last: error,
            });
        }

        if attempt.number >= max_attempts {
            tracing::warn!(
                endpoint = %attempt.endpoint,
                attempts = attempt.number,
                code = error.code(),
                "retry budget exhausted"
            );
            return Err(RetryFailure::Exhausted {
                attempts: attempt.number,
                last: error,
            });
        }

        let delay = policy.delay_after(attempt.number, &error);
        tracing::warn!(
            endpoint = %attempt.endpoint,
            attempt = attempt.number,
            delay_ms = delay.as_millis() as u64,
            code = error.code(),
            "retryable upstream failure"
        );
        attempt.last_error = Some(error);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryFailure::Cancelled { attempts: attempt.number });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Retry loop bound to one provider host: its policy, its shared budget and
/// the audit sink that sees every failed attempt.
#[derive(Clone)]
pub struct RetryController {
    provider: ProviderId,
    policy: RetryPolicy,
    budget: Arc<RateBudget>,
    audit: Arc<dyn AuditSink>,
    shutdown: CancellationToken,
}

impl RetryController {
    pub fn new(
        provider: ProviderId,
        policy: RetryPolicy,
        budget: Arc<RateBudget>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            provider,
            policy,
            budget,
            audit,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ties every call of this controller to `shutdown`.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub async fn execute<T, F, Fut>(&self, attempt: CallAttempt, call: F) -> Result<T, GatewayError>
    where
        F: FnMut(&CallAttempt) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute_cancellable(attempt, &CancellationToken::new(), call)
            .await
    }

    /// Like [`execute`](Self::execute), additionally stopping when `cancel` fires.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        attempt: CallAttempt,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut(&CallAttempt) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let endpoint = attempt.endpoint.clone();
        let token = self.shutdown.child_token();
        if cancel.is_cancelled() {
            token.cancel();
        }
        let _forward = ForwardCancel::spawn(cancel.clone(), token.clone());

        let provider = self.provider;
        let audit = Arc::clone(&self.audit);
        let on_failure = |attempt: &CallAttempt, error: &CallError| {
            audit.record(failure_event(provider, attempt, error));
        };

        execute_with_retry(&self.policy, self.budget.as_ref(), &token, attempt, on_failure, call)
            .await
            .map_err(|failure| match failure {
                RetryFailure::Exhausted { attempts, last } | RetryFailure::Permanent { attempts, last } => {
                    GatewayError::Terminal {
                        provider,
                        endpoint,
                        attempts,
                        cause: last,
                    }
                }
                RetryFailure::Cancelled { attempts } => GatewayError::Cancelled {
                    provider,
                    endpoint,
                    attempts,
                },
            })
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("provider", &self.provider)
            .field("policy", &self.policy)
            .field("budget", &self.budget)
            .finish()
    }
}

/// Propagates a caller token into the controller's own token until dropped.
struct ForwardCancel(tokio::task::JoinHandle<()>);

impl ForwardCancel {
    fn spawn(from: CancellationToken, to: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            from.cancelled().await;
            to.cancel();
        }))
    }
}

impl Drop for ForwardCancel {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn failure_event(provider: ProviderId, attempt: &CallAttempt, error: &CallError) -> AuditEvent {
    let action = match error.kind() {
        CallErrorKind::RateLimitExceeded | CallErrorKind::UpstreamThrottled => AuditAction::RateLimited,
        CallErrorKind::UpstreamServerError | CallErrorKind::UpstreamClientError => AuditAction::UpstreamError,
        CallErrorKind::Transport | CallErrorKind::Decode => AuditAction::RequestError,
    };

    let mut event = AuditEvent::new(provider, action, attempt.endpoint.clone())
        .with_detail("attempt", attempt.number)
        .with_detail("method", attempt.method.as_str())
        .with_detail("code", error.code())
        .with_detail("error", error.message());
    if let Some(status) = error.status() {
        event = event.with_detail("status", status);
    }
    event
}

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use thiserror::Error;

use crate::error::CallError;
use crate::ProviderId;

/// Token-bucket shape: burst `capacity`, sustained `refill_per_second`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl BudgetConfig {
    pub const fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.capacity >= 1 && self.refill_per_second.is_finite() && self.refill_per_second > 0.0
    }

    /// Time for one token to refill.
    pub fn refill_interval(&self) -> Duration {
        let per_second = if self.refill_per_second.is_finite() && self.refill_per_second > 0.0 {
            self.refill_per_second
        } else {
            1.0
        };
        Duration::from_secs_f64(1.0 / per_second).max(Duration::from_nanos(1))
    }

    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.capacity.max(1)).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(self.refill_interval())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self::new(2, 2.0)
    }
}

/// Returned when the bucket holds less than one token.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded; next token in {retry_in:?}")]
pub struct RateLimitExceeded {
    pub retry_in: Duration,
}

impl From<RateLimitExceeded> for CallError {
    fn from(error: RateLimitExceeded) -> Self {
        CallError::rate_limit_exceeded(error.retry_in)
    }
}

type DirectRateLimiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Non-blocking token bucket bounding the outbound call rate to one upstream host.
///
/// Refill and acquisition happen in a single atomic step, so one budget can be
/// shared by every concurrent request to the same host.
pub struct RateBudget<C: Clock = DefaultClock> {
    config: BudgetConfig,
    limiter: DirectRateLimiter<C>,
    clock: C,
}

impl RateBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self::with_clock(config, &DefaultClock::default())
    }
}

impl<C: Clock> RateBudget<C> {
    pub fn with_clock(config: BudgetConfig, clock: &C) -> Self {
        Self {
            config,
            limiter: RateLimiter::direct_with_clock(config.quota(), clock),
            clock: clock.clone(),
        }
    }

    /// Takes one token, or reports how long until one becomes available.
    pub fn try_acquire(&self) -> Result<(), RateLimitExceeded> {
        self.limiter.check().map_err(|not_until| RateLimitExceeded {
            retry_in: not_until.wait_time_from(self.clock.now()),
        })
    }

    pub fn config(&self) -> BudgetConfig {
        self.config
    }
}

impl<C: Clock> Debug for RateBudget<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("capacity", &self.config.capacity)
            .field("refill_per_second", &self.config.refill_per_second)
            .finish()
    }
}

/// Process-wide table of budgets, one per (provider, host) pair.
///
/// Every adapter instance for the same provider and host receives the same
/// budget, so independent instances cannot collectively exceed the upstream limit.
#[derive(Debug, Clone, Default)]
pub struct BudgetRegistry {
    budgets: Arc<Mutex<HashMap<(ProviderId, String), Arc<RateBudget>>>>,
}

impl BudgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by all gateways in this process.
    pub fn global() -> &'static BudgetRegistry {
        static GLOBAL: OnceLock<BudgetRegistry> = OnceLock::new();
        GLOBAL.get_or_init(BudgetRegistry::new)
    }

    /// Returns the budget bound to `(provider, host)`, creating it with `config`
    /// on first use. Later calls keep the first configuration.
    pub fn budget_for(&self, provider: ProviderId, host: &str, config: BudgetConfig) -> Arc<RateBudget> {
        let key = (provider, host.trim().to_ascii_lowercase());
        let mut budgets = self
            .budgets
            .lock()
            .expect("budget registry lock should not be poisoned");
        budgets
            .entry(key)
            .or_insert_with(|| Arc::new(RateBudget::new(config)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.budgets
            .lock()
            .expect("budget registry lock should not be poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

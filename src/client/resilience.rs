//! Retry and circuit breaker policies for upstream calls
//!
//! A call is first gated by the circuit breaker, then run through the retry
//! loop. The breaker sees one outcome per call (the final result of the retry
//! loop), so a call that burns all of its retries counts as one failure.

use crate::config::{BreakerSettings, RetrySettings};
use crate::error::{Result, ServiceNowError};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Retries after the first attempt
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Wait before the first retry
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Consecutive failed calls before the breaker opens
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long the breaker stays open
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Bounded retry with exponential backoff (no jitter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; retry *k* waits `base_delay * 2^(k-1)`
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy that never retries
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Build from configuration
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_retries,
            Duration::from_secs(settings.base_delay_secs),
        )
    }

    /// Retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(2_u32.pow(exponent))
    }

    /// Run `operation` until it succeeds, fails terminally, or retries run out.
    ///
    /// With `retryable == false` the operation is attempted exactly once.
    pub async fn run<T, F, Fut>(&self, retryable: bool, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_transient() || !retryable {
                        return Err(e);
                    }

                    if retries >= self.max_retries {
                        if self.max_retries > 0 {
                            warn!(
                                "Upstream call failed after {} attempts: {}",
                                retries + 1,
                                e
                            );
                        }
                        return Err(e);
                    }

                    retries += 1;
                    let backoff = self.delay_for(retries);
                    warn!(
                        "Upstream call failed ({}), retrying after {}s (attempt {}/{})",
                        e,
                        backoff.as_secs_f64(),
                        retries,
                        self.max_retries
                    );

                    sleep(backoff).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// Calls flow normally
    Closed,
    /// Calls fail fast
    Open,
    /// One trial call is in flight
    HalfOpen,
}

/// Consecutive-failure circuit breaker, shared by all calls of one client
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Build from configuration
    pub fn from_settings(settings: &BreakerSettings) -> Self {
        Self::new(
            settings.failure_threshold,
            Duration::from_secs(settings.cooldown_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to make a call.
    ///
    /// Fails fast with [`ServiceNowError::CircuitOpen`] while open. The first
    /// caller after the cooldown gets a trial permit; others keep failing fast
    /// until the trial resolves.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>> {
        let mut state = self.lock();
        let now = Instant::now();

        match *state {
            BreakerState::Closed { .. } => Ok(BreakerPermit::new(self, false)),
            BreakerState::Open { until } if now < until => {
                Err(ServiceNowError::CircuitOpen {
                    retry_after: until - now,
                })
            }
            BreakerState::Open { .. } => {
                info!("Circuit breaker half-open, allowing trial call");
                *state = BreakerState::HalfOpen;
                Ok(BreakerPermit::new(self, true))
            }
            BreakerState::HalfOpen => Err(ServiceNowError::CircuitOpen {
                retry_after: Duration::ZERO,
            }),
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        match *state {
            BreakerState::HalfOpen => {
                info!("Circuit breaker reset");
                *state = BreakerState::Closed {
                    consecutive_failures: 0,
                };
            }
            BreakerState::Closed { .. } => {
                *state = BreakerState::Closed {
                    consecutive_failures: 0,
                };
            }
            // Calls admitted before the breaker opened do not close it
            BreakerState::Open { .. } => {}
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    warn!(
                        "Circuit breaker opened for {}s after {} consecutive failures",
                        self.cooldown.as_secs(),
                        failures
                    );
                    *state = BreakerState::Open {
                        until: Instant::now() + self.cooldown,
                    };
                } else {
                    debug!(
                        "Circuit breaker failure count: {}/{}",
                        failures, self.failure_threshold
                    );
                    *state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            BreakerState::HalfOpen => {
                warn!(
                    "Circuit breaker trial failed, re-opening for {}s",
                    self.cooldown.as_secs()
                );
                *state = BreakerState::Open {
                    until: Instant::now() + self.cooldown,
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    fn on_abandoned_trial(&self) {
        let mut state = self.lock();
        if *state == BreakerState::HalfOpen {
            debug!("Circuit breaker trial abandoned, next call becomes the trial");
            *state = BreakerState::Open {
                until: Instant::now(),
            };
        }
    }

    /// Current state
    pub fn status(&self) -> CircuitStatus {
        match *self.lock() {
            BreakerState::Closed { .. } => CircuitStatus::Closed,
            BreakerState::Open { .. } => CircuitStatus::Open,
            BreakerState::HalfOpen => CircuitStatus::HalfOpen,
        }
    }

    /// Consecutive failures counted while closed (0 when open or half-open)
    pub fn consecutive_failures(&self) -> u32 {
        match *self.lock() {
            BreakerState::Closed {
                consecutive_failures,
            } => consecutive_failures,
            _ => 0,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

/// Admission ticket for one call; report the outcome through it.
///
/// Dropping an unresolved trial permit (e.g. the call was cancelled) hands
/// the trial to the next caller instead of leaving the breaker half-open.
#[must_use = "report the call outcome with success() or failure()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// The call reached a healthy upstream
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success();
    }

    /// The call failed transiently
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.on_abandoned_trial();
        }
    }
}

/// Circuit breaker + retry, owned by one upstream client
#[derive(Debug, Default)]
pub struct ResiliencePolicy {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResiliencePolicy {
    /// Combine a retry policy and a breaker
    pub fn new(retry: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self { retry, breaker }
    }

    /// Build from configuration
    pub fn from_settings(retry: &RetrySettings, breaker: &BreakerSettings) -> Self {
        Self::new(
            RetryPolicy::from_settings(retry),
            CircuitBreaker::from_settings(breaker),
        )
    }

    /// Retry policy in use
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Breaker in use
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute one upstream call: breaker gate, then the retry loop.
    ///
    /// Transient final outcomes count as a breaker failure; anything else
    /// (success, 404, decode errors) resets the failure run.
    pub async fn execute<T, F, Fut>(&self, retryable: bool, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.breaker.try_acquire()?;
        let outcome = self.retry.run(retryable, operation).await;

        match &outcome {
            Err(e) if e.is_transient() => permit.failure(),
            _ => permit.success(),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> ServiceNowError {
        ServiceNowError::UpstreamStatus {
            status: 503,
            message: "Service Unavailable".to_string(),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<()> = policy
            .run(true, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceNowError::NotFound("incident/abc".to_string()))
            })
            .await;

        assert!(matches!(result, Err(ServiceNowError::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_call_single_attempt() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<()> = policy
            .run(false, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.status(), CircuitStatus::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.status(), CircuitStatus::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(ServiceNowError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets_failure_run() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.try_acquire().unwrap().failure();
        breaker.try_acquire().unwrap().failure();
        breaker.try_acquire().unwrap().success();
        assert_eq!(breaker.consecutive_failures(), 0);

        breaker.try_acquire().unwrap().failure();
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_while_half_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.try_acquire().unwrap().failure();

        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.status(), CircuitStatus::HalfOpen);
        assert!(matches!(
            breaker.try_acquire(),
            Err(ServiceNowError::CircuitOpen { .. })
        ));

        trial.success();
        assert_eq!(breaker.status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_for_full_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.try_acquire().unwrap().failure();

        tokio::time::advance(Duration::from_secs(30)).await;
        breaker.try_acquire().unwrap().failure();

        match breaker.try_acquire() {
            Err(ServiceNowError::CircuitOpen { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            _ => panic!("Expected breaker to re-open"),
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_hands_over() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_secs(31)).await;

        drop(breaker.try_acquire().unwrap());

        let next = breaker.try_acquire().unwrap();
        assert!(next.is_trial());
        next.success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_resets_breaker() {
        let policy = ResiliencePolicy::new(
            RetryPolicy::disabled(),
            CircuitBreaker::new(5, Duration::from_secs(30)),
        );

        for _ in 0..4 {
            let _: Result<()> = policy.execute(true, || async { Err(unavailable()) }).await;
        }
        assert_eq!(policy.breaker().consecutive_failures(), 4);

        let _: Result<()> = policy
            .execute(true, || async {
                Err(ServiceNowError::NotFound("x".to_string()))
            })
            .await;
        assert_eq!(policy.breaker().consecutive_failures(), 0);
    }
}

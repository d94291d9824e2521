//! Retry policy and the orchestrator that drives one logical request
//! through a provider ordering.
//!
//! Each attempt runs under a per-attempt timeout and updates the shared
//! health registry. Retryable failures rotate to the next candidate (wrapping
//! around when there are more attempts than candidates) after an exponential
//! backoff delay; fatal failures stop immediately.

use super::error::{ErrorClass, ProviderError};
use super::health::HealthRegistry;
use super::selector::Candidate;
use super::transport::AttemptOptions;
use crate::config::{seconds, ClientConfig};
use crate::error::ApiError;
use crate::protocol::RequestContext;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Backoff configuration for one logical request
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Multiplier applied for every further attempt
    pub backoff_factor: f64,

    /// Upper bound on any single delay
    pub max_delay: Option<Duration>,

    /// Jitter factor (0.0 to 1.0) to randomize delays
    pub jitter_factor: f64,

    /// Whether to respect provider retry-after hints
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: None,
            jitter_factor: 0.0,
            respect_retry_after: true,
        }
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.retries.max(1),
            initial_delay: seconds(config.retry_delay),
            backoff_factor: config.retry_backoff_factor,
            max_delay: config.max_retry_delay.map(seconds),
            jitter_factor: config.retry_jitter,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Retries back to back without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            ..Self::new(max_attempts)
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay to wait after the `attempt`-th attempt (1-based) failed with
    /// `error`: `initial_delay * backoff_factor^(attempt-1)`, or the
    /// provider's retry-after hint, capped by `max_delay`.
    pub fn calculate_delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        if self.respect_retry_after {
            if let Some(retry_after) = error.retry_after() {
                return self.cap(retry_after);
            }
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let mut delay = if base.is_finite() { base } else { f64::MAX };
        if let Some(max) = self.max_delay {
            delay = delay.min(max.as_secs_f64());
        }

        if self.jitter_factor > 0.0 && delay > 0.0 {
            let jitter_range = delay * self.jitter_factor;
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            delay = (delay + jitter).max(0.0);
        }

        self.cap(Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX))
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    Failed(ProviderError),
}

impl AttemptOutcome {
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failed(err) => Some(err.class()),
        }
    }
}

/// One attempt of a logical request
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

/// A logical request that succeeded
#[derive(Debug, Clone)]
pub struct Success<T> {
    pub value: T,
    pub provider: String,
    /// Every attempt made, the successful one last
    pub attempts: Vec<AttemptRecord>,
}

/// Drives one logical request through an ordering of candidates
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    registry: Arc<HealthRegistry>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryOrchestrator {
    pub fn new(registry: Arc<HealthRegistry>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            registry,
            policy,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Run `call` against the candidates until one succeeds, a fatal error
    /// occurs, or the attempt budget is spent.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        ordering: &[Candidate],
        mut call: F,
    ) -> Result<Success<T>, ApiError>
    where
        F: FnMut(Candidate, AttemptOptions) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        if ordering.is_empty() {
            return Err(ApiError::new(attempts, last_error));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let candidate = &ordering[(attempt as usize - 1) % ordering.len()];
            let provider = candidate.id().to_string();
            let options = AttemptOptions::new(ctx.request_id, &provider, &ctx.model)
                .with_timeout(self.timeout);

            debug!(
                request_id = %ctx.request_id,
                provider = %provider,
                attempt,
                max_attempts,
                "attempting"
            );

            let started_at = Utc::now();
            let start = Instant::now();
            let result = match tokio::time::timeout(self.timeout, call(candidate.clone(), options)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    provider: provider.clone(),
                    after: Some(self.timeout),
                }),
            };
            let latency = start.elapsed();

            match result {
                Ok(value) => {
                    self.registry.record_success(&provider);
                    attempts.push(AttemptRecord {
                        provider: provider.clone(),
                        started_at,
                        outcome: AttemptOutcome::Success,
                        latency,
                    });
                    info!(
                        request_id = %ctx.request_id,
                        provider = %provider,
                        attempt,
                        latency_ms = latency.as_millis() as u64,
                        "request succeeded"
                    );
                    return Ok(Success {
                        value,
                        provider,
                        attempts,
                    });
                }
                Err(err) => {
                    self.registry.record_failure(&provider);
                    attempts.push(AttemptRecord {
                        provider: provider.clone(),
                        started_at,
                        outcome: AttemptOutcome::Failed(err.clone()),
                        latency,
                    });
                    warn!(
                        request_id = %ctx.request_id,
                        provider = %provider,
                        attempt,
                        class = %err.class(),
                        error = %err,
                        "attempt failed"
                    );

                    if !err.is_retryable() {
                        error!(
                            request_id = %ctx.request_id,
                            provider = %provider,
                            error = %err,
                            "fatal error, aborting request"
                        );
                        return Err(ApiError::new(attempts, Some(err)));
                    }

                    if attempt < max_attempts {
                        let delay = self.policy.calculate_delay(attempt, &err);
                        debug!(
                            request_id = %ctx.request_id,
                            next_provider = %ordering[attempt as usize % ordering.len()].id(),
                            delay_ms = delay.as_millis() as u64,
                            "retrying"
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    last_error = Some(err);
                }
            }
        }

        error!(
            request_id = %ctx.request_id,
            attempts = attempts.len(),
            "all attempts exhausted"
        );
        Err(ApiError::new(attempts, last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FeatureSet;
    use crate::providers::{ErrorMapper, HealthSnapshot, ProviderInfo};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn candidate(id: &str) -> Candidate {
        Candidate {
            provider: ProviderInfo {
                id: id.to_string(),
                models: BTreeSet::new(),
                priority: 1,
                health: HealthSnapshot::default(),
            },
            context_tokens: 8192,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("m", FeatureSet::chat())
    }

    fn transient(provider: &str) -> ProviderError {
        ProviderError::network(provider, "connection reset")
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(2));
        assert_eq!(policy.backoff_factor, 2.0);
        assert!(policy.max_delay.is_none());
    }

    #[test]
    fn test_policy_from_config() {
        let config = ClientConfig {
            retries: 5,
            retry_delay: 0.5,
            retry_backoff_factor: 3.0,
            max_retry_delay: Some(4.0),
            ..Default::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_policy_from_unvalidated_config_does_not_panic() {
        let config = ClientConfig {
            retry_delay: -3.0,
            max_retry_delay: Some(1e30),
            ..Default::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.initial_delay, Duration::ZERO);
        assert_eq!(policy.max_delay, Some(Duration::MAX));
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy::new(5).with_initial_delay(Duration::from_secs(2));
        let err = transient("p");
        assert_eq!(policy.calculate_delay(1, &err), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(2, &err), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(3, &err), Duration::from_secs(8));
    }

    #[test]
    fn test_max_delay_caps_backoff_and_hints() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(3, &transient("p")), Duration::from_secs(5));

        let rate_limited = ErrorMapper::from_status_code("p", 429, None, Some(Duration::from_secs(60)));
        assert_eq!(policy.calculate_delay(1, &rate_limited), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_hint_used() {
        let policy = RetryPolicy::default();
        let rate_limited = ErrorMapper::from_status_code("p", 429, None, Some(Duration::from_millis(750)));
        assert_eq!(policy.calculate_delay(1, &rate_limited), Duration::from_millis(750));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::new(3).with_initial_delay(Duration::from_secs(2))
        };
        for _ in 0..50 {
            let delay = policy.calculate_delay(1, &transient("p"));
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let registry = Arc::new(HealthRegistry::new());
        let orchestrator = RetryOrchestrator::new(Arc::clone(&registry), RetryPolicy::immediate(3), Duration::from_secs(1));
        let ordering = vec![candidate("a"), candidate("b")];

        let success = orchestrator
            .execute(&ctx(), &ordering, |c, _| async move { Ok::<_, ProviderError>(c.provider.id) })
            .await
            .unwrap();

        assert_eq!(success.value, "a");
        assert_eq!(success.provider, "a");
        assert_eq!(success.attempts.len(), 1);
        assert_eq!(registry.snapshot("a").consecutive_failures, 0);
        assert!(registry.snapshot("a").last_success.is_some());
    }

    #[tokio::test]
    async fn test_round_robin_wraps_around() {
        let registry = Arc::new(HealthRegistry::new());
        let orchestrator = RetryOrchestrator::new(registry, RetryPolicy::immediate(5), Duration::from_secs(1));
        let ordering = vec![candidate("a"), candidate("b")];

        let err = orchestrator
            .execute(&ctx(), &ordering, |c, _| async move { Err::<(), _>(transient(&c.provider.id)) })
            .await
            .unwrap_err();

        let providers: Vec<&str> = err.attempts.iter().map(|a| a.provider.as_str()).collect();
        assert_eq!(providers, vec!["a", "b", "a", "b", "a"]);
        assert_eq!(err.last_error.as_ref().map(|e| e.provider()), Some("a"));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts() {
        let registry = Arc::new(HealthRegistry::new());
        let orchestrator = RetryOrchestrator::new(Arc::clone(&registry), RetryPolicy::immediate(3), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let ordering = vec![candidate("a"), candidate("b")];

        let counter = Arc::clone(&calls);
        let err = orchestrator
            .execute(&ctx(), &ordering, move |c, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(ProviderError::fatal(c.provider.id, "bad api key")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts.len(), 1);
        assert!(err.is_fatal());
        assert_eq!(registry.snapshot("a").consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let registry = Arc::new(HealthRegistry::new());
        let orchestrator = RetryOrchestrator::new(registry, RetryPolicy::immediate(2), Duration::from_millis(100));
        let ordering = vec![candidate("slow"), candidate("fast")];

        let success = orchestrator
            .execute(&ctx(), &ordering, |c, _| async move {
                if c.provider.id == "slow" {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok::<_, ProviderError>(c.provider.id)
            })
            .await
            .unwrap();

        assert_eq!(success.value, "fast");
        assert!(matches!(
            success.attempts[0].outcome,
            AttemptOutcome::Failed(ProviderError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_are_observed() {
        let registry = Arc::new(HealthRegistry::new());
        let policy = RetryPolicy::new(3).with_initial_delay(Duration::from_secs(1));
        let orchestrator = RetryOrchestrator::new(registry, policy, Duration::from_secs(30));
        let ordering = vec![candidate("a")];

        let started = Instant::now();
        let _ = orchestrator
            .execute(&ctx(), &ordering, |c, _| async move { Err::<(), _>(transient(&c.provider.id)) })
            .await;

        // 1s after the first failure, 2s after the second, none after the last
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }
}

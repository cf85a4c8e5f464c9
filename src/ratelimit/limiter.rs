//! Fixed-window rate limiter over a shared counter store.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::decision::{AdmissionMode, Decision, FailurePolicy};
use super::request::RateLimitRequest;
use crate::config::LimiterConfig;
use crate::error::StoreError;
use crate::store::CounterStore;

/// Fixed-window rate limiter.
///
/// Each distinct request tuple gets a counter in the store that is created
/// with the window as its TTL and incremented on every later request. The
/// limiter keeps no state of its own, so one instance can be shared across
/// tasks and any number of instances can share one store.
pub struct RateLimiter {
    /// Where counters live
    store: Arc<dyn CounterStore>,
    /// Length of one window; the TTL given to new counters
    window: Duration,
    /// Maximum admitted requests per window (inclusive)
    limit: u64,
    /// How the first request of a window is recorded
    admission: AdmissionMode,
    /// Outcome when the store fails
    failure_policy: FailurePolicy,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("limit", &self.limit)
            .field("admission", &self.admission)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter admitting `limit` requests per `window` per key.
    ///
    /// Neither value is validated. With a zero limit only the request that
    /// opens a window is admitted.
    pub fn new(store: Arc<dyn CounterStore>, window: Duration, limit: u64) -> Self {
        Self {
            store,
            window,
            limit,
            admission: AdmissionMode::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(store: Arc<dyn CounterStore>, config: &LimiterConfig) -> Self {
        Self::new(store, config.window.duration(), config.limit)
            .with_admission(config.admission)
            .with_failure_policy(config.on_store_error)
    }

    /// Set how the first request of a window is recorded.
    pub fn with_admission(mut self, admission: AdmissionMode) -> Self {
        self.admission = admission;
        self
    }

    /// Set the outcome used when the store fails.
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Per-window limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Admission mode.
    pub fn admission(&self) -> AdmissionMode {
        self.admission
    }

    /// Store failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Check whether a request is admitted.
    ///
    /// Returns `false` when the window quota is exhausted, and also when the
    /// store fails unless the failure policy is [`FailurePolicy::Allow`].
    pub async fn check_rate_limit(&self, request: &RateLimitRequest) -> bool {
        self.evaluate(request).await.is_admitted(self.failure_policy)
    }

    /// Count a request against its window and return the full decision.
    ///
    /// Makes at most two store calls and never retries.
    pub async fn evaluate(&self, request: &RateLimitRequest) -> Decision {
        let key = request.key();

        trace!(
            key = %key,
            limit = self.limit,
            admission = ?self.admission,
            "Checking rate limit"
        );

        let result = match self.admission {
            AdmissionMode::CheckThenCreate => self.check_then_create(key.as_str()).await,
            AdmissionMode::CreateIfAbsent => self.create_if_absent(key.as_str()).await,
        };

        match result {
            Ok(decision) => {
                if let Decision::Deny { count } = decision {
                    debug!(
                        key = %key,
                        count = count,
                        limit = self.limit,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    policy = ?self.failure_policy,
                    "Counter store failed, rate limit decision is indeterminate"
                );
                Decision::Indeterminate(e)
            }
        }
    }

    async fn check_then_create(&self, key: &str) -> Result<Decision, StoreError> {
        if !self.store.exists(key).await? {
            self.store.set_with_expiry(key, 1, self.window).await?;
            return Ok(self.window_opened(key));
        }

        self.increment(key).await
    }

    async fn create_if_absent(&self, key: &str) -> Result<Decision, StoreError> {
        if self
            .store
            .set_if_absent_with_expiry(key, 1, self.window)
            .await?
        {
            return Ok(self.window_opened(key));
        }

        self.increment(key).await
    }

    async fn increment(&self, key: &str) -> Result<Decision, StoreError> {
        let count = self.store.increment(key).await?;

        if self.within_limit(count) {
            Ok(Decision::Admit { count })
        } else {
            Ok(Decision::Deny { count })
        }
    }

    fn window_opened(&self, key: &str) -> Decision {
        debug!(key = %key, window = ?self.window, "Opened new rate limit window");
        Decision::Admit { count: 1 }
    }

    fn within_limit(&self, count: i64) -> bool {
        i128::from(count) <= i128::from(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Window, WindowUnit};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const KEY: &str = "rate_limit:client1:user1:https://example.com";

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Exists(String),
        Set(String, i64, Duration),
        SetIfAbsent(String, i64, Duration),
        Increment(String),
    }

    /// Store double with canned answers that records every call.
    #[derive(Default)]
    struct ScriptedStore {
        exists: bool,
        created: bool,
        increment_to: i64,
        fail_exists: bool,
        fail_set: bool,
        fail_set_if_absent: bool,
        fail_increment: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().push(call);
        }
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }

    #[async_trait]
    impl CounterStore for ScriptedStore {
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.record(Call::Exists(key.to_string()));
            if self.fail_exists {
                return Err(unavailable());
            }
            Ok(self.exists)
        }

        async fn set_with_expiry(
            &self,
            key: &str,
            value: i64,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            self.record(Call::Set(key.to_string(), value, ttl));
            if self.fail_set {
                return Err(unavailable());
            }
            Ok(())
        }

        async fn set_if_absent_with_expiry(
            &self,
            key: &str,
            value: i64,
            ttl: Duration,
        ) -> Result<bool, StoreError> {
            self.record(Call::SetIfAbsent(key.to_string(), value, ttl));
            if self.fail_set_if_absent {
                return Err(unavailable());
            }
            Ok(self.created)
        }

        async fn increment(&self, key: &str) -> Result<i64, StoreError> {
            self.record(Call::Increment(key.to_string()));
            if self.fail_increment {
                return Err(unavailable());
            }
            Ok(self.increment_to)
        }
    }

    fn request() -> RateLimitRequest {
        RateLimitRequest::new("https://example.com", "client1", "user1")
    }

    fn limiter_over(store: &Arc<ScriptedStore>) -> RateLimiter {
        RateLimiter::new(store.clone(), Duration::from_secs(60), 5)
    }

    #[tokio::test]
    async fn test_exists_error_denies_without_further_calls() {
        let store = Arc::new(ScriptedStore {
            fail_exists: true,
            ..Default::default()
        });

        assert!(!limiter_over(&store).check_rate_limit(&request()).await);
        assert_eq!(store.calls(), vec![Call::Exists(KEY.to_string())]);
    }

    #[tokio::test]
    async fn test_absent_key_is_created_and_admitted() {
        let store = Arc::new(ScriptedStore::default());

        assert!(limiter_over(&store).check_rate_limit(&request()).await);
        assert_eq!(
            store.calls(),
            vec![
                Call::Exists(KEY.to_string()),
                Call::Set(KEY.to_string(), 1, Duration::from_secs(60)),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_error_denies() {
        let store = Arc::new(ScriptedStore {
            fail_set: true,
            ..Default::default()
        });

        let limiter = limiter_over(&store);
        assert!(!limiter.check_rate_limit(&request()).await);
        assert!(limiter.evaluate(&request()).await.is_indeterminate());
    }

    #[tokio::test]
    async fn test_existing_key_below_limit_admits() {
        let store = Arc::new(ScriptedStore {
            exists: true,
            increment_to: 4,
            ..Default::default()
        });

        assert!(limiter_over(&store).check_rate_limit(&request()).await);
        assert_eq!(
            store.calls(),
            vec![
                Call::Exists(KEY.to_string()),
                Call::Increment(KEY.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_count_equal_to_limit_admits() {
        let store = Arc::new(ScriptedStore {
            exists: true,
            increment_to: 5,
            ..Default::default()
        });

        let decision = limiter_over(&store).evaluate(&request()).await;
        assert!(matches!(decision, Decision::Admit { count: 5 }));
    }

    #[tokio::test]
    async fn test_existing_key_above_limit_denies() {
        let store = Arc::new(ScriptedStore {
            exists: true,
            increment_to: 6,
            ..Default::default()
        });

        let limiter = limiter_over(&store);
        assert!(!limiter.check_rate_limit(&request()).await);
        assert!(matches!(
            limiter.evaluate(&request()).await,
            Decision::Deny { count: 6 }
        ));
    }

    #[tokio::test]
    async fn test_increment_error_denies() {
        let store = Arc::new(ScriptedStore {
            exists: true,
            fail_increment: true,
            ..Default::default()
        });

        assert!(!limiter_over(&store).check_rate_limit(&request()).await);
    }

    #[tokio::test]
    async fn test_allow_policy_admits_on_store_failure() {
        let store = Arc::new(ScriptedStore {
            fail_exists: true,
            ..Default::default()
        });
        let limiter = limiter_over(&store).with_failure_policy(FailurePolicy::Allow);

        assert!(limiter.check_rate_limit(&request()).await);
        assert!(limiter.evaluate(&request()).await.is_indeterminate());
    }

    #[tokio::test]
    async fn test_allow_policy_still_denies_over_limit() {
        let store = Arc::new(ScriptedStore {
            exists: true,
            increment_to: 6,
            ..Default::default()
        });
        let limiter = limiter_over(&store).with_failure_policy(FailurePolicy::Allow);

        assert!(!limiter.check_rate_limit(&request()).await);
    }

    #[tokio::test]
    async fn test_create_if_absent_admits_new_key_with_one_call() {
        let store = Arc::new(ScriptedStore {
            created: true,
            ..Default::default()
        });
        let limiter = limiter_over(&store).with_admission(AdmissionMode::CreateIfAbsent);

        assert!(limiter.check_rate_limit(&request()).await);
        assert_eq!(
            store.calls(),
            vec![Call::SetIfAbsent(KEY.to_string(), 1, Duration::from_secs(60))]
        );
    }

    #[tokio::test]
    async fn test_create_if_absent_increments_existing_key() {
        let store = Arc::new(ScriptedStore {
            created: false,
            increment_to: 6,
            ..Default::default()
        });
        let limiter = limiter_over(&store).with_admission(AdmissionMode::CreateIfAbsent);

        assert!(!limiter.check_rate_limit(&request()).await);
        assert_eq!(
            store.calls(),
            vec![
                Call::SetIfAbsent(KEY.to_string(), 1, Duration::from_secs(60)),
                Call::Increment(KEY.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_if_absent_error_denies_without_increment() {
        let store = Arc::new(ScriptedStore {
            fail_set_if_absent: true,
            ..Default::default()
        });
        let limiter = limiter_over(&store).with_admission(AdmissionMode::CreateIfAbsent);

        assert!(!limiter.check_rate_limit(&request()).await);
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_opens_window_in_store() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), Duration::from_secs(60), 5);
        let key = request().key();

        assert!(limiter.check_rate_limit(&request()).await);
        assert!(store.exists(key.as_str()).await.unwrap());
        assert_eq!(store.get(key.as_str()), Some(1));
        assert_eq!(store.ttl(key.as_str()), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_sixth_request_in_window_is_denied() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), Duration::from_secs(60), 5);

        for i in 1..=5 {
            let decision = limiter.evaluate(&request()).await;
            assert!(
                matches!(decision, Decision::Admit { count } if count == i),
                "request {} should be admitted, got {}",
                i,
                decision
            );
        }

        assert!(!limiter.check_rate_limit(&request()).await);
        assert_eq!(store.get(request().key().as_str()), Some(6));

        // Denials keep advancing the counter and never re-admit.
        assert!(!limiter.check_rate_limit(&request()).await);
        assert_eq!(store.get(request().key().as_str()), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_readmits() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), Duration::from_secs(60), 2);

        assert!(limiter.check_rate_limit(&request()).await);
        assert!(limiter.check_rate_limit(&request()).await);
        assert!(!limiter.check_rate_limit(&request()).await);

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(limiter.check_rate_limit(&request()).await);
        assert_eq!(store.get(request().key().as_str()), Some(1));
    }

    #[tokio::test]
    async fn test_distinct_tuples_have_separate_windows() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), Duration::from_secs(60), 1);
        let alice = RateLimitRequest::new("/orders", "web", "alice");
        let bob = RateLimitRequest::new("/orders", "web", "bob");

        assert!(limiter.check_rate_limit(&alice).await);
        assert!(!limiter.check_rate_limit(&alice).await);
        assert!(limiter.check_rate_limit(&bob).await);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_limit_admits_only_first_request() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store, Duration::from_secs(60), 0);

        assert!(limiter.check_rate_limit(&request()).await);
        assert!(!limiter.check_rate_limit(&request()).await);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_open_window_once() {
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(
            RateLimiter::new(store.clone(), Duration::from_secs(60), 100)
                .with_admission(AdmissionMode::CreateIfAbsent),
        );

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.evaluate(&request()).await })
            })
            .collect();

        let decisions: Vec<Decision> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let openers = decisions
            .iter()
            .filter(|d| matches!(d, Decision::Admit { count: 1 }))
            .count();

        assert_eq!(openers, 1);
        assert!(decisions.iter().all(|d| d.is_admitted(FailurePolicy::Deny)));
        assert_eq!(store.get(request().key().as_str()), Some(20));
    }

    #[test]
    fn test_from_config() {
        let config = LimiterConfig {
            limit: 7,
            window: Window::new(3, WindowUnit::Minute),
            admission: AdmissionMode::CreateIfAbsent,
            on_store_error: FailurePolicy::Allow,
        };
        let limiter = RateLimiter::from_config(Arc::new(MemoryStore::new()), &config);

        assert_eq!(limiter.limit(), 7);
        assert_eq!(limiter.window(), Duration::from_secs(180));
        assert_eq!(limiter.admission(), AdmissionMode::CreateIfAbsent);
        assert_eq!(limiter.failure_policy(), FailurePolicy::Allow);
    }

    #[test]
    fn test_limiter_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RateLimiter>();
    }
}

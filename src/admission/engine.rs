//! Core admission decision engine.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::{reconciler, window, Decision, UsageSnapshot};
use crate::config::LimiterConfig;
use crate::error::{KeywardenError, Result};
use crate::registry::{self, KeyRecord, RecordChange, RecordFilter};
use crate::store::KeyStore;

/// Default requests allowed per window when issuing a key without an
/// explicit limit.
const DEFAULT_LIMIT: u64 = 60;
/// Default fixed window size.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default multiplier deriving the blacklist threshold from a key's limit.
const DEFAULT_BLACKLIST_MULTIPLIER: u64 = 4;
/// Default blacklist penalty duration.
const DEFAULT_BLACKLIST_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Policy constants for admission decisions.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Fixed window size, independent of per-key limits.
    pub window: Duration,
    /// A key is blacklisted once its violation tally reaches
    /// `limit * blacklist_multiplier`.
    pub blacklist_multiplier: u64,
    /// How long a blacklist lasts once imposed.
    pub blacklist_duration: Duration,
    /// Limit assigned to newly issued keys when none is given.
    pub default_limit: u64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            blacklist_multiplier: DEFAULT_BLACKLIST_MULTIPLIER,
            blacklist_duration: DEFAULT_BLACKLIST_DURATION,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl From<&LimiterConfig> for AdmissionPolicy {
    fn from(cfg: &LimiterConfig) -> Self {
        Self {
            window: Duration::from_secs(cfg.window_secs),
            blacklist_multiplier: cfg.blacklist_multiplier,
            blacklist_duration: Duration::from_secs(cfg.blacklist_duration_secs),
            default_limit: cfg.default_limit,
        }
    }
}

/// The admission decision engine.
///
/// Holds the key store and the policy constants. Every mutation goes through
/// the store's conditional-update primitive, so concurrent requests for the
/// same key serialize on the record rather than on the engine; when a
/// conditional update loses a race the decision is re-evaluated from a fresh
/// read.
pub struct AdmissionEngine<S> {
    store: Arc<S>,
    policy: AdmissionPolicy,
}

impl<S: KeyStore> AdmissionEngine<S> {
    /// Create an engine over the given store.
    pub fn new(store: Arc<S>, policy: AdmissionPolicy) -> Self {
        Self { store, policy }
    }

    /// The configured policy constants.
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Decide whether to admit a request presenting `key` at `now`.
    ///
    /// Rejections are reported as `Decision` variants; only store failures
    /// surface as errors, and those propagate rather than being interpreted
    /// as an admit or a deny.
    pub async fn admit(&self, key: &str, now: DateTime<Utc>) -> Result<Decision> {
        loop {
            let Some(record) = self.store.find(key).await? else {
                trace!(key, "admission check for unknown key");
                return Ok(Decision::InvalidKey);
            };

            // Lazy blacklist reconciliation before any decision.
            let (still_blacklisted, record) =
                reconciler::reconcile(self.store.as_ref(), record, now).await?;
            if still_blacklisted {
                let Some(until) = record.blacklisted_until else {
                    // Reconciled away underneath us; re-evaluate.
                    continue;
                };
                let remaining = until
                    .signed_duration_since(now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                debug!(key, %until, "rejecting blacklisted key");
                return Ok(Decision::Blacklisted { until, remaining });
            }

            let window_size = self.policy.window;

            // An expired window resets and admits the triggering request.
            if window::is_expired(&record, now, window_size) {
                let filter = RecordFilter::WindowExpired {
                    now,
                    window: window_size,
                };
                if self
                    .store
                    .update_if(key, filter, RecordChange::ResetWindow { now })
                    .await?
                    .is_some()
                {
                    trace!(key, "window reset, request admitted");
                    return Ok(Decision::Admitted);
                }
                // Another request reset the window first.
                continue;
            }

            // Window still active: count the hit if there is room.
            if record.request_count < record.limit {
                let filter = RecordFilter::UnderLimit {
                    now,
                    window: window_size,
                };
                if self
                    .store
                    .update_if(key, filter, RecordChange::IncrementCount)
                    .await?
                    .is_some()
                {
                    return Ok(Decision::Admitted);
                }
                // Raced to the limit boundary; re-evaluate.
                continue;
            }

            // Over limit. Violations accumulate even on rejected attempts.
            let filter = RecordFilter::OverLimit {
                now,
                window: window_size,
            };
            let Some(updated) = self
                .store
                .update_if(key, filter, RecordChange::IncrementExcessive)
                .await?
            else {
                continue;
            };

            let threshold = updated.limit.saturating_mul(self.policy.blacklist_multiplier);
            if updated.excessive_count >= threshold {
                let until = now + self.penalty_span();
                if self
                    .store
                    .update_if(
                        key,
                        RecordFilter::NotBlacklisted,
                        RecordChange::SetBlacklist { until },
                    )
                    .await?
                    .is_some()
                {
                    info!(
                        key,
                        %until,
                        violations = updated.excessive_count,
                        "key blacklisted for excessive use"
                    );
                    return Ok(Decision::NewlyBlacklisted { until });
                }
                // A concurrent request imposed the blacklist first.
                continue;
            }

            let Some(window_start) = updated.window_start else {
                // A reset raced in between; re-evaluate.
                continue;
            };
            debug!(
                key,
                limit = updated.limit,
                count = updated.request_count,
                "rate limit exceeded"
            );
            return Ok(Decision::RateLimited {
                limit: updated.limit,
                count: updated.request_count,
                window_start,
                retry_after: window::time_until_reset(&updated, now, window_size),
            });
        }
    }

    /// Read-only snapshot of a key's state at `now`. Never mutates.
    pub async fn usage(&self, key: &str, now: DateTime<Utc>) -> Result<UsageSnapshot> {
        let record = self
            .store
            .find(key)
            .await?
            .ok_or(KeywardenError::InvalidKey)?;
        Ok(UsageSnapshot::new(&record, now, self.policy.window))
    }

    /// Issue a new API key for `owner_id` and register its record.
    ///
    /// Falls back to the policy's default limit when none is given.
    pub async fn issue_key(
        &self,
        owner_id: &str,
        limit: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<KeyRecord> {
        let key = registry::generate_api_key(registry::DEFAULT_KEY_BYTES);
        let record = KeyRecord::new(
            key,
            owner_id.to_string(),
            limit.unwrap_or(self.policy.default_limit),
            now,
        );
        self.store.insert(record.clone()).await?;
        info!(key = %record.key, owner = owner_id, limit = record.limit, "issued new API key");
        Ok(record)
    }

    /// Clear every blacklist whose penalty window has elapsed. Returns the
    /// number of records reconciled.
    pub async fn sweep_expired_blacklists(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(reconciler::sweep_expired(self.store.as_ref(), now).await?)
    }

    /// Administrative override: lift a key's blacklist regardless of its
    /// expiry. Returns whether the key was blacklisted.
    pub async fn free_from_blacklist(&self, key: &str) -> Result<bool> {
        Ok(reconciler::release(self.store.as_ref(), key).await?)
    }

    /// Currently blacklisted keys, after reconciling any expired entries.
    pub async fn blacklisted_keys(&self, now: DateTime<Utc>) -> Result<Vec<KeyRecord>> {
        reconciler::sweep_expired(self.store.as_ref(), now).await?;
        Ok(self
            .store
            .find_matching(RecordFilter::BlacklistActive { now })
            .await?)
    }

    fn penalty_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.policy.blacklist_duration)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio_test::assert_ok;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn engine() -> AdmissionEngine<MemoryStore> {
        AdmissionEngine::new(Arc::new(MemoryStore::new()), AdmissionPolicy::default())
    }

    async fn issued(engine: &AdmissionEngine<MemoryStore>, limit: u64) -> String {
        engine
            .issue_key("owner", Some(limit), t0())
            .await
            .unwrap()
            .key
    }

    #[tokio::test]
    async fn test_unknown_key_is_invalid_and_mutates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = AdmissionEngine::new(store.clone(), AdmissionPolicy::default());

        let decision = engine.admit("no-such-key", t0()).await.unwrap();
        assert_eq!(decision, Decision::InvalidKey);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_admissions_within_limit() {
        let engine = engine();
        let key = issued(&engine, 60).await;

        for _ in 0..60 {
            let decision = assert_ok!(engine.admit(&key, t0()).await);
            assert_eq!(decision, Decision::Admitted);
        }

        let usage = engine.usage(&key, t0()).await.unwrap();
        assert_eq!(usage.request_count, 60);
    }

    #[tokio::test]
    async fn test_61st_request_is_rate_limited() {
        let engine = engine();
        let key = issued(&engine, 60).await;

        for _ in 0..60 {
            engine.admit(&key, t0()).await.unwrap();
        }

        let now = t0() + chrono::Duration::seconds(30);
        let decision = engine.admit(&key, now).await.unwrap();
        match decision {
            Decision::RateLimited {
                limit,
                count,
                window_start,
                retry_after,
            } => {
                assert_eq!(limit, 60);
                assert_eq!(count, 60);
                assert_eq!(window_start, t0());
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fourth_violation_blacklists_with_24h_penalty() {
        // limit = 1, multiplier = 4 -> threshold of 4 violations
        let engine = engine();
        let key = issued(&engine, 1).await;

        assert_eq!(engine.admit(&key, t0()).await.unwrap(), Decision::Admitted);

        for _ in 0..3 {
            let decision = engine.admit(&key, t0()).await.unwrap();
            assert!(matches!(decision, Decision::RateLimited { .. }));
        }

        let decision = engine.admit(&key, t0()).await.unwrap();
        assert_eq!(
            decision,
            Decision::NewlyBlacklisted {
                until: t0() + chrono::Duration::hours(24)
            }
        );

        // Subsequent requests are rejected with the remaining penalty time
        let later = t0() + chrono::Duration::hours(1);
        let decision = engine.admit(&key, later).await.unwrap();
        assert_eq!(
            decision,
            Decision::Blacklisted {
                until: t0() + chrono::Duration::hours(24),
                remaining: Duration::from_secs(23 * 60 * 60),
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_attempts_keep_accumulating_violations() {
        let engine = engine();
        let key = issued(&engine, 1).await;

        engine.admit(&key, t0()).await.unwrap();
        engine.admit(&key, t0()).await.unwrap();
        engine.admit(&key, t0()).await.unwrap();

        let usage = engine.usage(&key, t0()).await.unwrap();
        assert_eq!(usage.excessive_count, 2);
    }

    #[tokio::test]
    async fn test_expired_blacklist_is_reconciled_on_next_use() {
        let engine = engine();
        let key = issued(&engine, 1).await;

        engine.admit(&key, t0()).await.unwrap();
        for _ in 0..4 {
            engine.admit(&key, t0()).await.unwrap();
        }

        // Past the 24h penalty the key is evaluated fresh and admitted
        let after_penalty = t0() + chrono::Duration::hours(25);
        let decision = engine.admit(&key, after_penalty).await.unwrap();
        assert_eq!(decision, Decision::Admitted);

        let usage = engine.usage(&key, after_penalty).await.unwrap();
        assert!(!usage.blacklisted);
        assert_eq!(usage.excessive_count, 0);
        assert_eq!(usage.request_count, 1);
    }

    #[tokio::test]
    async fn test_window_reset_counts_request_and_decays_violations() {
        let engine = engine();
        let key = issued(&engine, 1).await;

        engine.admit(&key, t0()).await.unwrap();
        // Two violations in the active window
        engine.admit(&key, t0()).await.unwrap();
        engine.admit(&key, t0()).await.unwrap();

        let next_window = t0() + chrono::Duration::seconds(60);
        let decision = engine.admit(&key, next_window).await.unwrap();
        assert_eq!(decision, Decision::Admitted);

        let usage = engine.usage(&key, next_window).await.unwrap();
        assert_eq!(usage.request_count, 1);
        assert_eq!(usage.excessive_count, 1);
        assert_eq!(usage.window_start, Some(next_window));
    }

    #[tokio::test]
    async fn test_window_start_is_monotonic() {
        let engine = engine();
        let key = issued(&engine, 60).await;

        let mut last_start = engine.usage(&key, t0()).await.unwrap().window_start;
        for minutes in [1i64, 3, 3, 7] {
            let now = t0() + chrono::Duration::minutes(minutes);
            engine.admit(&key, now).await.unwrap();
            let start = engine.usage(&key, now).await.unwrap().window_start;
            assert!(start >= last_start);
            last_start = start;
        }
    }

    #[tokio::test]
    async fn test_usage_does_not_mutate() {
        let store = Arc::new(MemoryStore::new());
        let engine = AdmissionEngine::new(store.clone(), AdmissionPolicy::default());
        let key = engine
            .issue_key("owner", None, t0())
            .await
            .unwrap()
            .key;
        engine.admit(&key, t0()).await.unwrap();

        let before = store.find(&key).await.unwrap().unwrap();
        engine
            .usage(&key, t0() + chrono::Duration::hours(48))
            .await
            .unwrap();
        let after = store.find(&key).await.unwrap().unwrap();
        assert_eq!(before, after);

        let missing = engine.usage("no-such-key", t0()).await;
        assert!(matches!(missing, Err(KeywardenError::InvalidKey)));
    }

    #[tokio::test]
    async fn test_issue_key_defaults_and_uniqueness() {
        let engine = engine();
        let first = engine.issue_key("alice", None, t0()).await.unwrap();
        let second = engine.issue_key("alice", None, t0()).await.unwrap();

        assert_ne!(first.key, second.key);
        assert_eq!(first.limit, 60);
        assert_eq!(first.request_count, 0);
        assert!(!first.is_blacklisted);
    }

    #[tokio::test]
    async fn test_free_from_blacklist() {
        let engine = engine();
        let key = issued(&engine, 1).await;

        engine.admit(&key, t0()).await.unwrap();
        for _ in 0..4 {
            engine.admit(&key, t0()).await.unwrap();
        }
        assert!(matches!(
            engine.admit(&key, t0()).await.unwrap(),
            Decision::Blacklisted { .. }
        ));

        assert!(engine.free_from_blacklist(&key).await.unwrap());
        assert!(!engine.free_from_blacklist(&key).await.unwrap());

        // The freed key is evaluated fresh in the next window
        let next_window = t0() + chrono::Duration::seconds(60);
        assert_eq!(
            engine.admit(&key, next_window).await.unwrap(),
            Decision::Admitted
        );
    }

    #[tokio::test]
    async fn test_blacklisted_keys_listing_reconciles_first() {
        let store = Arc::new(MemoryStore::new());
        let engine = AdmissionEngine::new(store.clone(), AdmissionPolicy::default());

        let mut expired = KeyRecord::new("expired".to_string(), "o".to_string(), 60, t0());
        expired.is_blacklisted = true;
        expired.blacklisted_until = Some(t0());
        let mut active = KeyRecord::new("active".to_string(), "o".to_string(), 60, t0());
        active.is_blacklisted = true;
        active.blacklisted_until = Some(t0() + chrono::Duration::hours(5));
        store.insert(expired).await.unwrap();
        store.insert(active).await.unwrap();

        let now = t0() + chrono::Duration::hours(1);
        let listed = engine.blacklisted_keys(now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "active");
        assert!(!store.find("expired").await.unwrap().unwrap().is_blacklisted);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_exceed_limit() {
        let engine = Arc::new(engine());
        let key = issued(&engine, 50).await;

        let mut handles = Vec::new();
        for _ in 0..100 {
            let engine = engine.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                engine.admit(&key, t0()).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() == Decision::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);

        let usage = engine.usage(&key, t0()).await.unwrap();
        assert_eq!(usage.request_count, 50);
    }

    /// Store stub that always fails, to verify fail-closed behavior.
    struct FailingStore;

    type StoreResult<T> = std::result::Result<T, StoreError>;

    #[async_trait]
    impl KeyStore for FailingStore {
        async fn find(&self, _key: &str) -> StoreResult<Option<KeyRecord>> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }

        async fn insert(&self, _record: KeyRecord) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }

        async fn update_if(
            &self,
            _key: &str,
            _filter: RecordFilter,
            _change: RecordChange,
        ) -> StoreResult<Option<KeyRecord>> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }

        async fn update_matching(
            &self,
            _filter: RecordFilter,
            _change: RecordChange,
        ) -> StoreResult<u64> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }

        async fn find_matching(&self, _filter: RecordFilter) -> StoreResult<Vec<KeyRecord>> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates_instead_of_deciding() {
        let engine = AdmissionEngine::new(Arc::new(FailingStore), AdmissionPolicy::default());

        let result = engine.admit("any-key", t0()).await;
        assert!(matches!(
            result,
            Err(KeywardenError::Store(StoreError::Unavailable(_)))
        ));

        let swept = engine.sweep_expired_blacklists(t0()).await;
        assert!(swept.is_err());
    }
}

//! Keyed query cache with staleness/garbage-collection windows, per-key
//! request deduplication and policy-driven retries.
//!
//! Values are stored as `serde_json::Value` and decoded on read, so one cache
//! serves every namespace.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::{RetryAttempt, retry_with_backoff};
use crate::config::{QueryConfig, QueryOptions};
use crate::error::{QueryError, SimulationError};
use crate::models::CarDetails;
use crate::validation::sanitize_license_plate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryNamespace {
    CarDetails,
    InsuranceOffers,
    OfferDetails,
}

impl QueryNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CarDetails => "car-details",
            Self::InsuranceOffers => "insurance-offers",
            Self::OfferDetails => "offer-details",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    pub namespace: QueryNamespace,
    pub id: String,
}

impl QueryKey {
    pub fn car_details(license_plate: &str) -> Self {
        Self {
            namespace: QueryNamespace::CarDetails,
            id: sanitize_license_plate(license_plate),
        }
    }

    pub fn insurance_offers(car: &CarDetails) -> Self {
        Self {
            namespace: QueryNamespace::InsuranceOffers,
            id: format!(
                "{}|{}|{}|{}|{}",
                car.make, car.model, car.year, car.fipe_code, car.estimated_value
            ),
        }
    }

    pub fn offer_details(offer_id: &str) -> Self {
        Self {
            namespace: QueryNamespace::OfferDetails,
            id: offer_id.to_string(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.as_str(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Fetching,
    Idle,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Option<Value>,
    status: QueryStatus,
    fetch_status: FetchStatus,
    error: Option<SimulationError>,
    data_updated_at: Option<Instant>,
    last_accessed: Instant,
    invalidated: bool,
    /// Bumped by every invalidation, so a fetch can tell it was overtaken.
    invalidations: u64,
    failure_count: u32,
    /// Bumped whenever a fetch settles.
    generation: u64,
    stale_time: Duration,
    gc_time: Duration,
}

impl CacheEntry {
    fn pending(options: &QueryOptions) -> Self {
        Self {
            data: None,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            error: None,
            data_updated_at: None,
            last_accessed: Instant::now(),
            invalidated: false,
            invalidations: 0,
            failure_count: 0,
            generation: 0,
            stale_time: options.stale_time,
            gc_time: options.gc_time,
        }
    }

    fn is_stale(&self) -> bool {
        self.invalidated
            || self
                .data_updated_at
                .is_none_or(|updated| updated.elapsed() >= self.stale_time)
    }

    fn invalidate(&mut self) {
        self.invalidated = true;
        self.invalidations += 1;
    }

    fn is_collectable(&self) -> bool {
        self.fetch_status == FetchStatus::Idle && self.last_accessed.elapsed() > self.gc_time
    }

    fn fresh_data(&self) -> Option<&Value> {
        if self.status == QueryStatus::Success && !self.is_stale() {
            self.data.as_ref()
        } else {
            None
        }
    }
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub error: Option<SimulationError>,
    pub is_stale: bool,
    pub failure_count: u32,
    /// Milliseconds since the data was last written.
    pub data_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    /// Successful entries still inside their stale window.
    pub active: usize,
    pub stale: usize,
    pub error: usize,
    pub loading: usize,
}

struct QueryCache {
    entries: DashMap<QueryKey, CacheEntry>,
    fetch_locks: DashMap<QueryKey, Arc<Mutex<()>>>,
    config: QueryConfig,
}

/// Shared handle to the query cache; clones see the same entries.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<QueryCache>,
}

impl QueryClient {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(QueryCache {
                entries: DashMap::new(),
                fetch_locks: DashMap::new(),
                config,
            }),
        }
    }

    pub fn options(&self, namespace: QueryNamespace) -> QueryOptions {
        let config = &self.inner.config;
        match namespace {
            QueryNamespace::CarDetails => config.car_details,
            QueryNamespace::InsuranceOffers => config.insurance_offers,
            QueryNamespace::OfferDetails => config.offer_details,
        }
    }

    /// Fetch with the namespace's configured options.
    pub async fn fetch_query<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SimulationError>>,
    {
        let options = self.options(key.namespace);
        self.fetch_query_with(key, options, fetcher).await
    }

    /// Serve fresh cached data, otherwise run `fetcher` under the retry policy.
    /// Concurrent callers for the same key share a single underlying fetch.
    /// When a refetch fails and older data is cached, the stale data is served
    /// and the error is kept on the entry.
    pub async fn fetch_query_with<T, F, Fut>(
        &self,
        key: QueryKey,
        options: QueryOptions,
        mut fetcher: F,
    ) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SimulationError>>,
    {
        self.collect_garbage();

        if let Some(value) = self.read_fresh::<T>(&key)? {
            debug!(key = %key, "Query cache hit");
            return Ok(value);
        }

        let lock = self.fetch_lock(&key);
        let seen_generation = self.generation(&key);
        let _guard = lock.lock().await;

        if let Some(value) = self.read_fresh::<T>(&key)? {
            debug!(key = %key, "Query resolved by a concurrent fetch");
            return Ok(value);
        }
        if self.generation(&key) != seen_generation {
            if let Some(outcome) = self.settled_outcome::<T>(&key) {
                debug!(key = %key, "Query settled by a concurrent fetch");
                return outcome;
            }
        }

        debug!(key = %key, "Query cache miss, fetching");
        let started = self.mark_fetching(&key, &options);

        let mut attempts = 0;
        let result = retry_with_backoff(
            &options.retry,
            SimulationError::is_retryable,
            |retry: RetryAttempt, error: &SimulationError| self.record_retry(&key, retry, error),
            |attempt| {
                attempts = attempt;
                fetcher()
            },
        )
        .await;

        match result {
            Ok(value) => {
                self.store_fetched(&key, &options, started, serde_json::to_value(&value)?);
                Ok(value)
            }
            Err(error) => {
                warn!(key = %key, kind = %error.kind, "Query failed");
                let stale = self.store_error(&key, error.clone(), attempts);
                match stale {
                    Some(data) => {
                        warn!(key = %key, "Serving stale data after failed refetch");
                        Ok(serde_json::from_value(data)?)
                    }
                    None => Err(QueryError::Fetch(error)),
                }
            }
        }
    }

    /// Warm the cache; failures are logged and dropped.
    pub async fn prefetch<T, F, Fut>(&self, key: QueryKey, fetcher: F)
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SimulationError>>,
    {
        let label = key.to_string();
        if let Err(e) = self.fetch_query::<T, F, Fut>(key, fetcher).await {
            warn!(key = %label, error = %e, "Prefetch failed");
        }
    }

    /// Write data directly, as a mutation does after it succeeds.
    pub fn set_query_data<T: Serialize>(&self, key: QueryKey, value: &T) -> Result<(), QueryError> {
        let options = self.options(key.namespace);
        let json = serde_json::to_value(value)?;
        self.store_success(&key, &options, json);
        Ok(())
    }

    /// Cached data regardless of staleness.
    pub fn get_cached_value<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let data = {
            let mut entry = self.inner.entries.get_mut(key)?;
            entry.last_accessed = Instant::now();
            entry.data.clone()?
        };
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached query data failed to decode");
                None
            }
        }
    }

    pub fn query_state(&self, key: &QueryKey) -> Option<QueryState> {
        self.inner.entries.get(key).map(|entry| QueryState {
            status: entry.status,
            fetch_status: entry.fetch_status,
            error: entry.error.clone(),
            is_stale: entry.is_stale(),
            failure_count: entry.failure_count,
            data_age_ms: entry
                .data_updated_at
                .map(|updated| updated.elapsed().as_millis() as u64),
        })
    }

    /// Mark an entry stale so the next read refetches. Returns whether it existed.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        match self.inner.entries.get_mut(key) {
            Some(mut entry) => {
                entry.invalidate();
                debug!(key = %key, "Query invalidated");
                true
            }
            None => false,
        }
    }

    pub fn invalidate_namespace(&self, namespace: QueryNamespace) {
        let mut count = 0;
        for mut entry in self.inner.entries.iter_mut() {
            if entry.key().namespace == namespace {
                entry.invalidate();
                count += 1;
            }
        }
        debug!(namespace = namespace.as_str(), count = count, "Namespace invalidated");
    }

    pub fn invalidate_all(&self) {
        for mut entry in self.inner.entries.iter_mut() {
            entry.invalidate();
        }
        debug!(count = self.inner.entries.len(), "All queries invalidated");
    }

    pub fn remove(&self, key: &QueryKey) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
        self.inner
            .fetch_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        info!("Query cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            total: self.inner.entries.len(),
            ..CacheStats::default()
        };
        for entry in self.inner.entries.iter() {
            if entry.fetch_status == FetchStatus::Fetching {
                stats.loading += 1;
            }
            match entry.status {
                QueryStatus::Error => stats.error += 1,
                QueryStatus::Success if entry.is_stale() => stats.stale += 1,
                QueryStatus::Success => stats.active += 1,
                QueryStatus::Pending => {}
            }
        }
        stats
    }

    /// Evict entries idle for longer than their gc window.
    pub fn collect_garbage(&self) -> usize {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|key, entry| {
            let keep = !entry.is_collectable();
            if !keep {
                debug!(key = %key, "Evicting idle query");
            }
            keep
        });
        let removed = before.saturating_sub(self.inner.entries.len());
        if removed > 0 {
            let entries = &self.inner.entries;
            self.inner
                .fetch_locks
                .retain(|key, lock| entries.contains_key(key) || Arc::strong_count(lock) > 1);
        }
        removed
    }

    fn fetch_lock(&self, key: &QueryKey) -> Arc<Mutex<()>> {
        self.inner
            .fetch_locks
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn generation(&self, key: &QueryKey) -> u64 {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.generation)
            .unwrap_or(0)
    }

    fn read_fresh<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<T>, QueryError> {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            return Ok(None);
        };
        let Some(value) = entry.fresh_data().cloned() else {
            return Ok(None);
        };
        entry.last_accessed = Instant::now();
        drop(entry);
        Ok(Some(serde_json::from_value(value)?))
    }

    /// What a fetch that just settled under another caller left behind:
    /// its error, or the data it served.
    fn settled_outcome<T: DeserializeOwned>(
        &self,
        key: &QueryKey,
    ) -> Option<Result<T, QueryError>> {
        let (error, data) = {
            let entry = self.inner.entries.get(key)?;
            (entry.error.clone(), entry.data.clone())
        };
        match (data, error) {
            (Some(data), _) => Some(serde_json::from_value(data).map_err(QueryError::from)),
            (None, Some(error)) => Some(Err(QueryError::Fetch(error))),
            (None, None) => None,
        }
    }

    /// Returns the entry's invalidation count at the start of the fetch.
    fn mark_fetching(&self, key: &QueryKey, options: &QueryOptions) -> u64 {
        let mut entry = self
            .inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::pending(options));
        entry.fetch_status = FetchStatus::Fetching;
        entry.failure_count = 0;
        entry.last_accessed = Instant::now();
        entry.invalidations
    }

    fn record_retry(&self, key: &QueryKey, retry: RetryAttempt, error: &SimulationError) {
        if let Some(mut entry) = self.inner.entries.get_mut(key) {
            entry.failure_count = retry.attempt;
        }
        warn!(
            key = %key,
            kind = %error.kind,
            attempt = retry.attempt,
            max_attempts = retry.max_attempts,
            delay_ms = retry.delay.as_millis() as u64,
            "Query attempt failed, retrying"
        );
    }

    /// Apply a fetched value unless the entry was dropped meanwhile. An entry
    /// invalidated during the fetch keeps the data but stays stale.
    fn store_fetched(&self, key: &QueryKey, options: &QueryOptions, started: u64, data: Value) {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            debug!(key = %key, "Query removed while fetching, dropping result");
            return;
        };
        Self::apply_success(&mut entry, options, data);
        if entry.invalidations != started {
            debug!(key = %key, "Query invalidated while fetching, result kept stale");
            entry.invalidated = true;
        }
    }

    fn store_success(&self, key: &QueryKey, options: &QueryOptions, data: Value) {
        let mut entry = self
            .inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::pending(options));
        Self::apply_success(&mut entry, options, data);
    }

    fn apply_success(entry: &mut CacheEntry, options: &QueryOptions, data: Value) {
        let now = Instant::now();
        entry.data = Some(data);
        entry.status = QueryStatus::Success;
        entry.fetch_status = FetchStatus::Idle;
        entry.error = None;
        entry.data_updated_at = Some(now);
        entry.last_accessed = now;
        entry.invalidated = false;
        entry.failure_count = 0;
        entry.generation += 1;
        entry.stale_time = options.stale_time;
        entry.gc_time = options.gc_time;
    }

    /// Record a failed fetch. Entries that already hold data keep their
    /// success status and the stale data is returned for serving.
    fn store_error(&self, key: &QueryKey, error: SimulationError, attempts: u32) -> Option<Value> {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            debug!(key = %key, "Query removed while fetching, dropping error");
            return None;
        };
        if entry.data.is_none() {
            entry.status = QueryStatus::Error;
        }
        entry.fetch_status = FetchStatus::Idle;
        entry.error = Some(error);
        entry.failure_count = attempts;
        entry.last_accessed = Instant::now();
        entry.generation += 1;
        entry.data.clone()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::error::SimulationErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn client() -> QueryClient {
        QueryClient::new(QueryConfig::immediate())
    }

    fn counting_fetch(
        calls: &AtomicU32,
        value: &'static str,
    ) -> impl FnMut() -> std::future::Ready<Result<String, SimulationError>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value.to_string()))
        }
    }

    #[tokio::test]
    async fn test_second_read_is_cache_hit() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::car_details("abc-1234");

        let first: String = client
            .fetch_query(key.clone(), counting_fetch(&calls, "corolla"))
            .await
            .unwrap();
        let second: String = client
            .fetch_query(key.clone(), counting_fetch(&calls, "other"))
            .await
            .unwrap();

        assert_eq!(first, "corolla");
        assert_eq!(second, "corolla");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(key.id, "ABC1234");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::car_details("ABC1234");

        let _: String = client
            .fetch_query(key.clone(), counting_fetch(&calls, "a"))
            .await
            .unwrap();
        assert!(client.invalidate(&key));
        assert_eq!(client.stats().stale, 1);

        let refreshed: String = client
            .fetch_query(key.clone(), counting_fetch(&calls, "b"))
            .await
            .unwrap();
        assert_eq!(refreshed, "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // stale data stays readable until replaced
        client.invalidate_all();
        assert_eq!(client.get_cached_value::<String>(&key).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_call() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::car_details("ABC1234");

        let fetch = || {
            let calls = &calls;
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::task::yield_now().await;
                    Ok::<_, SimulationError>(42u32)
                }
            }
        };
        let (a, b) = tokio::join!(
            client.fetch_query(key.clone(), fetch()),
            client.fetch_query(key.clone(), fetch()),
        );

        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_shared() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::offer_details("offer-9");

        let fetch = || {
            let calls = &calls;
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::task::yield_now().await;
                    Err::<u32, _>(SimulationError::validation("offer not found"))
                }
            }
        };
        let (a, b) = tokio::join!(
            client.fetch_query(key.clone(), fetch()),
            client.fetch_query(key.clone(), fetch()),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in [a, b] {
            assert!(matches!(
                result,
                Err(QueryError::Fetch(ref e)) if e.kind == SimulationErrorKind::ValidationError
                    && e.message == "offer not found"
            ));
        }
        assert_eq!(client.stats().error, 1);
    }

    #[tokio::test]
    async fn test_failed_refetch_serves_stale_data() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::car_details("ABC1234");

        client.set_query_data(key.clone(), &"cached").unwrap();
        client.invalidate(&key);

        let value: String = client
            .fetch_query(key.clone(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(SimulationError::new(
                    SimulationErrorKind::NetworkError,
                    "down",
                )))
            })
            .await
            .unwrap();

        assert_eq!(value, "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let state = client.query_state(&key).unwrap();
        assert_eq!(state.status, QueryStatus::Success);
        assert!(state.is_stale);
        assert_eq!(state.failure_count, 4);
        assert_eq!(state.error.map(|e| e.kind), Some(SimulationErrorKind::NetworkError));

        // the next successful fetch replaces the stale value and clears the error
        let value: String = client
            .fetch_query(key.clone(), counting_fetch(&calls, "fresh"))
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        let state = client.query_state(&key).unwrap();
        assert!(!state.is_stale);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_keeps_result_stale() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::car_details("ABC1234");

        let slow = || {
            let calls = &calls;
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, SimulationError>("late".to_string())
                }
            }
        };
        let (value, ()) = tokio::join!(client.fetch_query(key.clone(), slow()), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            client.invalidate_all();
        });

        assert_eq!(value.unwrap(), "late");
        let stats = client.stats();
        assert_eq!((stats.active, stats.stale), (0, 1));

        let _: String = client
            .fetch_query(key.clone(), counting_fetch(&calls, "again"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.stats().active, 1);
    }

    #[tokio::test]
    async fn test_clear_during_fetch_drops_result() {
        let client = client();
        let key = QueryKey::car_details("ABC1234");

        let (value, ()) = tokio::join!(
            client.fetch_query(key.clone(), || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, SimulationError>(1u8)
            }),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                client.clear();
            }
        );

        assert_eq!(value.unwrap(), 1);
        assert_eq!(client.stats().total, 0);
    }

    #[tokio::test]
    async fn test_retryable_errors_use_retry_budget() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::car_details("ABC1234");

        let result: Result<String, QueryError> = client
            .fetch_query(key.clone(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(SimulationError::new(
                    SimulationErrorKind::NetworkError,
                    "down",
                )))
            })
            .await;

        assert!(matches!(result, Err(QueryError::Fetch(ref e)) if e.kind == SimulationErrorKind::NetworkError));
        // lookup namespace: one attempt plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let state = client.query_state(&key).unwrap();
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.failure_count, 4);
        assert_eq!(client.stats().error, 1);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let client = client();
        let calls = AtomicU32::new(0);

        let result: Result<String, QueryError> = client
            .fetch_query(QueryKey::offer_details("missing"), || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(SimulationError::validation("offer not found")))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let client = client();
        let calls = AtomicU32::new(0);

        let value: u32 = client
            .fetch_query(QueryKey::offer_details("offer-1"), || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(if attempt == 0 {
                    Err(SimulationError::new(SimulationErrorKind::ServerError, "500"))
                } else {
                    Ok(7)
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_stale_time_always_refetches_and_gc_evicts() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::offer_details("offer-2");
        let options = QueryOptions::new(Duration::ZERO, Duration::ZERO, BackoffPolicy::no_retry());

        for _ in 0..2 {
            let _: String = client
                .fetch_query_with(key.clone(), options, counting_fetch(&calls, "x"))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(client.collect_garbage(), 1);
        assert_eq!(client.stats().total, 0);
    }

    #[tokio::test]
    async fn test_set_query_data_then_read_is_hit() {
        let client = client();
        let calls = AtomicU32::new(0);
        let key = QueryKey::insurance_offers(&CarDetails {
            make: "Fiat".to_string(),
            model: "Argo".to_string(),
            year: 2021,
            fipe_code: "001461-3".to_string(),
            estimated_value: 61_000.0,
        });

        client
            .set_query_data(key.clone(), &vec!["offer-1".to_string()])
            .unwrap();
        let offers: Vec<String> = client
            .fetch_query(key.clone(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok(Vec::<String>::new()))
            })
            .await
            .unwrap();

        assert_eq!(offers, vec!["offer-1".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.stats().active, 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let client = client();
        client
            .set_query_data(QueryKey::car_details("ABC1234"), &1u8)
            .unwrap();
        client
            .set_query_data(QueryKey::offer_details("offer-1"), &2u8)
            .unwrap();
        client.invalidate_namespace(QueryNamespace::OfferDetails);
        assert_eq!(client.stats().stale, 1);

        assert!(client.remove(&QueryKey::car_details("ABC1234")));
        assert!(!client.remove(&QueryKey::car_details("ABC1234")));
        client.clear();
        assert_eq!(client.stats(), CacheStats::default());
    }

    #[test]
    fn test_undecodable_cached_value_reads_as_miss() {
        let client = client();
        let key = QueryKey::offer_details("offer-1");
        client.set_query_data(key.clone(), &"not a number").unwrap();

        assert_eq!(client.get_cached_value::<u32>(&key), None);
        assert_eq!(client.get_cached_value::<String>(&key).as_deref(), Some("not a number"));
    }

    #[tokio::test]
    async fn test_prefetch_swallows_errors() {
        let client = client();
        client
            .prefetch::<String, _, _>(QueryKey::offer_details("x"), || {
                std::future::ready(Err(SimulationError::validation("nope")))
            })
            .await;
        client
            .prefetch(QueryKey::offer_details("offer-3"), || {
                std::future::ready(Ok::<_, SimulationError>("warm".to_string()))
            })
            .await;
        assert_eq!(
            client
                .get_cached_value::<String>(&QueryKey::offer_details("offer-3"))
                .as_deref(),
            Some("warm")
        );
    }
}

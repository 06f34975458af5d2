//! Request Coalescer - deduplicated, throttled fetches in front of the response cache
//!
//! ## Request Coalescing
//!
//! When several callers ask for the same key while a fetch for it is still
//! running, only the first caller starts a fetch. Everyone else subscribes to
//! the in-flight request and receives the same outcome, success or failure.
//!
//! ## Global Throttle
//!
//! Dispatched fetches are spaced by at least `min_request_spacing`, across all
//! keys. Each new request reserves the next free dispatch slot when it is
//! registered, so bursts of distinct keys dispatch first-come-first-served.
//! Cache hits never take a slot.
//!
//! ```text
//! caller ──► in flight? ──yes──► subscribe ─────────────────────┐
//!                │no                                            │
//!                ▼                                              ▼
//!            cache hit? ──yes──► return value            shared outcome
//!                │no                                            ▲
//!                ▼                                              │
//!      reserve slot ─► spawn: sleep_until(slot) ─► fetch ─► cache ─► broadcast
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::fetch::FetchError;
use super::response::ResponseCache;
use crate::config::CacheConfig;

/// Result every caller of a wave receives
pub type Outcome = Result<Value, FetchError>;
type InFlightMap = Arc<Mutex<HashMap<String, InFlightRequest>>>;

/// Dispatch deadline used when the configured spacing overflows `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Internal state for an in-flight request
struct InFlightRequest {
    /// Identifies the wave that owns this entry
    wave_id: u64,
    /// Broadcast channel to notify waiters
    sender: broadcast::Sender<Outcome>,
    /// When the request was registered
    started_at: Instant,
}

/// Dispatch bookkeeping shared by every key
#[derive(Debug, Default)]
struct ThrottleState {
    /// Dispatch time of the most recently reserved fetch
    last_dispatch: Option<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns a pending entry for the lifetime of its fetch task.
///
/// Dropping the wave removes its entry, even when the fetch panics, so
/// waiters see a closed channel instead of hanging.
struct Wave {
    key: String,
    wave_id: u64,
    in_flight: InFlightMap,
    sender: broadcast::Sender<Outcome>,
}

impl Wave {
    fn complete(self, outcome: Outcome) {
        let sender = self.sender.clone();
        drop(self);
        // Receivers may have gone away; nothing to do then
        let _ = sender.send(outcome);
    }
}

impl Drop for Wave {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(&self.key).map(|req| req.wave_id) == Some(self.wave_id) {
            if let Some(req) = in_flight.remove(&self.key) {
                debug!(
                    key = %self.key,
                    waiting = req.sender.receiver_count(),
                    duration_ms = req.started_at.elapsed().as_millis() as u64,
                    "In-flight request settled"
                );
            }
        }
    }
}

/// Deduplicating, rate-limited front door to the response cache.
///
/// Cloning shares the cache, the in-flight map and the throttle.
#[derive(Clone)]
pub struct RequestCoalescer {
    cache: ResponseCache,
    in_flight: InFlightMap,
    throttle: Arc<Mutex<ThrottleState>>,
    next_wave_id: Arc<AtomicU64>,
    min_request_spacing: Duration,
}

impl RequestCoalescer {
    pub fn new(cache: ResponseCache, config: &CacheConfig) -> Self {
        debug!(
            ttl_secs = cache.ttl().as_secs(),
            spacing_ms = config.min_request_spacing.as_millis() as u64,
            "RequestCoalescer initialized"
        );

        Self {
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            throttle: Arc::new(Mutex::new(ThrottleState::default())),
            next_wave_id: Arc::new(AtomicU64::new(0)),
            min_request_spacing: config.min_request_spacing,
        }
    }

    /// Build a coalescer with its own default-configured cache
    pub fn with_defaults() -> Self {
        let config = CacheConfig::default();
        Self::new(ResponseCache::new(&config), &config)
    }

    /// The cache this coalescer reads and fills
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Number of requests currently in flight
    pub fn pending_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Fetch `key` through the cache, coalescing concurrent callers.
    ///
    /// `fetch` runs at most once per wave, on a spawned task, after the
    /// global throttle allows it. A successful result is cached; failures are
    /// not, and every caller in the wave receives the same error.
    pub async fn throttled_request<F, Fut>(&self, key: &str, fetch: F) -> Outcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (mut receiver, owned) = {
            let mut in_flight = lock(&self.in_flight);

            if let Some(receiver) = in_flight.get(key).map(|req| req.sender.subscribe()) {
                debug!(key = key, "Coalescing onto in-flight request");
                (receiver, None)
            } else {
                if let Some(value) = self.cache.get(key) {
                    return Ok(value);
                }

                let (sender, receiver) = broadcast::channel(1);
                let wave_id = self.next_wave_id.fetch_add(1, Ordering::Relaxed);
                in_flight.insert(
                    key.to_string(),
                    InFlightRequest {
                        wave_id,
                        sender: sender.clone(),
                        started_at: Instant::now(),
                    },
                );
                (receiver, Some((sender, wave_id)))
            }
        };

        // The in-flight guard is released here; dropping a wave relocks it
        if let Some((sender, wave_id)) = owned {
            let wave = Wave {
                key: key.to_string(),
                wave_id,
                in_flight: Arc::clone(&self.in_flight),
                sender,
            };
            let dispatch_at = self.reserve_dispatch_slot();
            self.spawn_wave(wave, dispatch_at, fetch);
        }

        match receiver.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Abandoned),
        }
    }

    /// Claim the next dispatch time, at least `min_request_spacing` after the
    /// previously claimed one.
    fn reserve_dispatch_slot(&self) -> Instant {
        let mut throttle = lock(&self.throttle);
        let now = Instant::now();
        let dispatch_at = match throttle.last_dispatch {
            Some(last) => last
                .checked_add(self.min_request_spacing)
                .unwrap_or_else(|| now + FAR_FUTURE)
                .max(now),
            None => now,
        };
        throttle.last_dispatch = Some(dispatch_at);

        if dispatch_at > now {
            debug!(
                wait_ms = (dispatch_at - now).as_millis() as u64,
                "Throttling request dispatch"
            );
        }
        dispatch_at
    }

    fn spawn_wave<F, Fut>(&self, wave: Wave, dispatch_at: Instant, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let cache = self.cache.clone();

        tokio::spawn(async move {
            tokio::time::sleep_until(dispatch_at).await;
            debug!(key = %wave.key, "Dispatching request");

            let outcome = fetch().await;
            match &outcome {
                Ok(value) => cache.set(&wave.key, value.clone()),
                // Expected when logged out
                Err(e) if e.is_unauthorized() => {}
                Err(e) => warn!(key = %wave.key, error = %e, "Throttled request failed"),
            }

            wave.complete(outcome);
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{join_all, BoxFuture};
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn counting_fetch(
        calls: &Arc<AtomicU32>,
        value: Value,
    ) -> impl FnOnce() -> BoxFuture<'static, Outcome> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let coalescer = RequestCoalescer::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));

        let requests = (0..5).map(|_| {
            coalescer.throttled_request("feed", counting_fetch(&calls, json!({"a": 1})))
        });
        let results = join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), json!({"a": 1}));
        }
        assert_eq!(coalescer.pending_count(), 0);
        assert_eq!(coalescer.cache().get("feed"), Some(json!({"a": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let coalescer = RequestCoalescer::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));

        let requests = (0..3).map(|_| {
            let calls = Arc::clone(&calls);
            coalescer.throttled_request("broken", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Status {
                    status: 500,
                    message: "server error".into(),
                })
            })
        });
        let results = join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap_err().status(), Some(500));
        }
        assert!(!coalescer.cache().has("broken"));
        assert_eq!(coalescer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_failure_is_returned() {
        let coalescer = RequestCoalescer::with_defaults();

        let result = coalescer
            .throttled_request("me", || async {
                Err(FetchError::Status {
                    status: 401,
                    message: "logged out".into(),
                })
            })
            .await;

        assert!(result.unwrap_err().is_unauthorized());
        assert!(!coalescer.cache().has("me"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_fetch() {
        let coalescer = RequestCoalescer::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));
        coalescer.cache().set("feed", json!([1, 2, 3]));

        let start = Instant::now();
        let value = coalescer
            .throttled_request("feed", counting_fetch(&calls, json!("unused")))
            .await
            .unwrap();

        assert_eq!(value, json!([1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_are_spaced() {
        let coalescer = RequestCoalescer::with_defaults();
        let dispatched = Arc::new(Mutex::new(Vec::new()));

        let requests = ["user_1", "event_1", "event_2"].into_iter().map(|key| {
            let dispatched = Arc::clone(&dispatched);
            coalescer.throttled_request(key, move || async move {
                lock(&dispatched).push(Instant::now());
                Ok(json!(key))
            })
        });
        let results = join_all(requests).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let times = lock(&dispatched).clone();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_millis(2000));
        assert!(times[2] - times[1] >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_wave_allows_fresh_fetch() {
        let coalescer = RequestCoalescer::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));

        coalescer
            .throttled_request("feed", counting_fetch(&calls, json!(1)))
            .await
            .unwrap();
        coalescer.cache().invalidate("feed");
        coalescer
            .throttled_request("feed", counting_fetch(&calls, json!(2)))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coalescer.cache().get("feed"), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_spacing_saturates_instead_of_hanging() {
        let cache = ResponseCache::with_defaults();
        let config = CacheConfig {
            min_request_spacing: Duration::from_millis(u64::MAX),
            ..CacheConfig::default()
        };
        let coalescer = RequestCoalescer::new(cache, &config);

        let first = coalescer
            .throttled_request("a", || async { Ok(json!("a")) })
            .await;
        assert_eq!(first.unwrap(), json!("a"));

        // The second key is parked far in the future, but the call stays live
        let second = tokio::time::timeout(
            Duration::from_secs(1),
            coalescer.throttled_request("b", || async { Ok(json!("b")) }),
        )
        .await;
        assert!(second.is_err());
        assert_eq!(coalescer.pending_count(), 1);
    }

    #[test]
    fn test_no_runtime_panics_without_leaking_entry() {
        let coalescer = RequestCoalescer::with_defaults();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            futures::executor::block_on(
                coalescer.throttled_request("a", || async { Ok(json!("a")) }),
            )
        }));

        assert!(result.is_err());
        assert_eq!(coalescer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_fetch_is_abandoned() {
        let coalescer = RequestCoalescer::with_defaults();

        let result = coalescer
            .throttled_request("explodes", || async { panic!("fetch blew up") })
            .await;

        assert_eq!(result.unwrap_err(), FetchError::Abandoned);
        assert_eq!(coalescer.pending_count(), 0);
    }
}

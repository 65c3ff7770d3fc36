use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::body_tap::BodySha256;
use crate::clock::Clock;

/// A replayable outcome plus the request fingerprint it was produced for.
#[derive(Debug, Clone)]
pub struct SavedResult {
    pub key: String,
    pub method: Method,
    pub url: String,
    pub critical_headers: Vec<(HeaderName, Option<HeaderValue>)>,
    pub body_digest: BodySha256,
    pub status: StatusCode,
    pub response_headers: HeaderMap,
    pub response_body: Bytes,
    /// Stamped by the cache on insert.
    pub added_at: Option<Instant>,
}

impl SavedResult {
    /// Rebuild the stored response exactly as it was first sent.
    pub fn replay(&self) -> Response {
        let mut res = Response::new(Body::from(self.response_body.clone()));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.response_headers.clone();
        res
    }
}

struct Inner {
    entries: HashMap<String, Arc<SavedResult>>,
    // oldest at the front; insertion stamps never decrease
    order: VecDeque<(String, Instant)>,
    lifetime: Duration,
}

/// Key to result map with time-based expiry.
///
/// Expiry is driven by inserts: each insert first drops entries from the
/// front of the insertion queue until it meets one that is still live, so the
/// work per insert is proportional to the number of entries that expired.
pub struct ResultCache {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(lifetime: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                lifetime,
            }),
            clock,
        }
    }

    /// Live entry for `key`. Entries past their lifetime read as misses even
    /// before a sweep has removed them.
    pub fn lookup(&self, key: &str) -> Option<Arc<SavedResult>> {
        let now = self.clock.now();
        let inner = self.inner.read();
        let saved = inner.entries.get(key)?;
        match saved.added_at {
            Some(added) if now.saturating_duration_since(added) > inner.lifetime => None,
            _ => Some(Arc::clone(saved)),
        }
    }

    /// Store `result` unless its key already holds a live entry.
    ///
    /// Returns false when the existing entry was kept.
    pub fn insert(&self, mut result: SavedResult) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        inner.sweep(now);
        if inner.entries.contains_key(&result.key) {
            debug!(
                target: "arw::idempotency",
                key = %result.key,
                "result already cached; keeping first entry"
            );
            return false;
        }
        result.added_at = Some(now);
        let key = result.key.clone();
        inner.order.push_back((key.clone(), now));
        inner.entries.insert(key, Arc::new(result));
        gauge!("arw_idempotency_cache_entries").set(inner.entries.len() as f64);
        true
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let removed = inner.sweep(now);
        gauge!("arw_idempotency_cache_entries").set(inner.entries.len() as f64);
        removed
    }

    pub fn lifetime(&self) -> Duration {
        self.inner.read().lifetime
    }

    pub fn set_lifetime(&self, lifetime: Duration) {
        self.inner.write().lifetime = lifetime;
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn sweep(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((_, added)) = self.order.front() {
            if now.saturating_duration_since(*added) <= self.lifetime {
                break;
            }
            let Some((key, added)) = self.order.pop_front() else {
                break;
            };
            let stale = self
                .entries
                .get(&key)
                .is_some_and(|saved| saved.added_at == Some(added));
            if stale {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            counter!("arw_idempotency_evictions_total").increment(removed as u64);
            debug!(
                target: "arw::idempotency",
                removed,
                remaining = self.entries.len(),
                "expired idempotency results"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn saved(key: &str) -> SavedResult {
        SavedResult {
            key: key.to_string(),
            method: Method::POST,
            url: "/".into(),
            critical_headers: Vec::new(),
            body_digest: BodySha256([0; 32]),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: Bytes::from_static(b"body"),
            added_at: None,
        }
    }

    fn cache(lifetime: Duration) -> (ResultCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ResultCache::new(lifetime, clock.clone()), clock)
    }

    #[test]
    fn insert_then_lookup() {
        let (cache, _) = cache(6 * HOUR);
        assert!(cache.lookup("abc").is_none());
        assert!(cache.insert(saved("abc")));
        let hit = cache.lookup("abc").expect("cached");
        assert_eq!(hit.key, "abc");
        assert!(hit.added_at.is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn existing_entry_is_never_overwritten() {
        let (cache, _) = cache(6 * HOUR);
        assert!(cache.insert(saved("abc")));
        let mut second = saved("abc");
        second.response_body = Bytes::from_static(b"other");
        assert!(!cache.insert(second));
        assert_eq!(&cache.lookup("abc").unwrap().response_body[..], b"body");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn insert_sweeps_expired_entries() {
        let (cache, clock) = cache(6 * HOUR);
        cache.insert(saved("first"));
        clock.advance(6 * HOUR + Duration::from_secs(1));
        cache.insert(saved("second"));
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("first").is_none());
        assert!(cache.lookup("second").is_some());
    }

    #[test]
    fn entry_at_exact_lifetime_survives() {
        let (cache, clock) = cache(HOUR);
        cache.insert(saved("edge"));
        clock.advance(HOUR);
        cache.insert(saved("other"));
        assert!(cache.lookup("edge").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entry_reads_as_miss_before_sweep() {
        let (cache, clock) = cache(HOUR);
        cache.insert(saved("k"));
        clock.advance(2 * HOUR);
        assert!(cache.lookup("k").is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.insert(saved("k")));
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("k").is_some());
    }

    #[test]
    fn sweep_stops_at_first_live_entry() {
        let (cache, clock) = cache(HOUR);
        cache.insert(saved("a"));
        clock.advance(Duration::from_secs(30 * 60));
        cache.insert(saved("b"));
        clock.advance(Duration::from_secs(45 * 60));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.lookup("a").is_none());
        assert!(cache.lookup("b").is_some());
    }

    #[test]
    fn shorter_lifetime_applies_on_next_sweep() {
        let (cache, clock) = cache(6 * HOUR);
        cache.insert(saved("a"));
        clock.advance(2 * HOUR);
        assert_eq!(cache.purge_expired(), 0);
        cache.set_lifetime(HOUR);
        assert_eq!(cache.lifetime(), HOUR);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn replay_rebuilds_response() {
        let mut result = saved("r");
        result.status = StatusCode::ACCEPTED;
        result
            .response_headers
            .append("x-response", HeaderValue::from_static("bar"));
        result
            .response_headers
            .append("x-response", HeaderValue::from_static("baz"));
        let res = result.replay();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(res.headers().get_all("x-response").iter().count(), 2);
    }

    proptest! {
        #[test]
        fn live_entries_match_model(steps in proptest::collection::vec(0u64..90, 1..40)) {
            let lifetime = Duration::from_secs(60);
            let (cache, clock) = cache(lifetime);
            let mut stamps: Vec<Duration> = Vec::new();
            for (idx, advance) in steps.iter().enumerate() {
                clock.advance(Duration::from_secs(*advance));
                let key = format!("k{idx}");
                prop_assert!(cache.insert(saved(&key)));
                stamps.push(clock.elapsed());
                let now = clock.elapsed();
                let expected = stamps.iter().filter(|at| now - **at <= lifetime).count();
                prop_assert_eq!(cache.len(), expected);
            }
        }
    }
}

//! Short-lived memoisation of assembled API responses.
//!
//! Entries are never invalidated by new datapoints; a cached chart can lag
//! the store by up to the TTL.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::debug;

use crate::chart::ChartQuery;

struct CacheEntry {
    value: Arc<Value>,
    expires_at: Instant,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

/// Key over every path and chart parameter. Absent parts render as
/// `undefined`, so distinct combinations never collide.
pub fn cache_key(
    suite_id: Option<&str>,
    test_id: Option<&str>,
    datapoint_id: Option<&str>,
    query: &ChartQuery,
) -> String {
    fn part(value: Option<&str>) -> &str {
        value.unwrap_or("undefined")
    }
    format!(
        "suite{}test{}dp{}ct{}dr{}dc{}",
        part(suite_id),
        part(test_id),
        part(datapoint_id),
        part(query.chart_type.as_deref()),
        part(query.data_range.as_deref()),
        part(query.date_cutoff.as_deref()),
    )
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if Instant::now() < entry.expires_at {
            debug!("Response cache hit: {}", key);
            return Some(entry.value.clone());
        }
        entries.remove(key);
        None
    }

    pub fn put(&self, key: String, value: Arc<Value>) {
        if let Ok(mut entries) = self.entries.lock() {
            debug!("Response cache store: {}", key);
            entries.insert(
                key,
                CacheEntry {
                    value,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }
}

/// Periodically purge expired entries so unread keys do not accumulate.
pub fn spawn_cache_janitor(cache: Arc<ResponseCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!("Response cache purged {} expired entries", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(chart_type: Option<&str>, data_range: Option<&str>, date_cutoff: Option<&str>) -> ChartQuery {
        ChartQuery {
            chart_type: chart_type.map(str::to_string),
            data_range: data_range.map(str::to_string),
            date_cutoff: date_cutoff.map(str::to_string),
        }
    }

    #[test]
    fn test_cache_key_renders_absent_parts() {
        let key = cache_key(Some("s"), None, None, &ChartQuery::default());
        assert_eq!(key, "suitestestundefineddpundefinedctundefineddrundefineddcundefined");
    }

    #[test]
    fn test_cache_key_distinguishes_parameters() {
        let a = cache_key(Some("s"), Some("t"), None, &query(None, None, Some("7")));
        let b = cache_key(Some("s"), Some("t"), None, &query(None, None, Some("14")));
        let c = cache_key(Some("s"), Some("t"), None, &query(None, None, Some("7")));
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put("k".into(), Arc::new(json!({"v": 1})));
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = ResponseCache::new(Duration::from_secs(10));
        cache.put("old".into(), Arc::new(json!(1)));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put("new".into(), Arc::new(json!(2)));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}

//! Per-key sliding-window rate limiting for event ingestion.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sliding-window limiter keyed by tenant.
///
/// One instance is owned by the ingestion service and torn down with it;
/// there is no global limiter state. Check and record happen under a single
/// lock acquisition.
pub struct RateLimiter {
    enabled: bool,
    limit: u32,
    window: Duration,
    entries: Arc<RwLock<HashMap<String, Vec<DateTime<Utc>>>>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, limit: u32, window: Duration) -> Self {
        Self {
            enabled,
            limit,
            window,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Atomically check and record one request for `key`. Returns whether
    /// the request is allowed.
    pub async fn check_and_record(&self, key: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let now = Utc::now();
        let cutoff = now - self.window;

        let mut entries = self.entries.write().await;
        let timestamps = entries.entry(key.to_string()).or_default();
        timestamps.retain(|timestamp| *timestamp > cutoff);

        if timestamps.len() as u32 >= self.limit {
            return false;
        }
        timestamps.push(now);
        true
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            limit: self.limit,
            window: self.window,
            entries: self.entries.clone(),
        }
    }
}

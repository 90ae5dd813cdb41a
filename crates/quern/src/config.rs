//! Engine configuration: per-request quotas and pool sizing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The (time, memory) budget one request may consume before it is
/// truncated to `Partial` or resolved `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryQuota {
    /// Wall-time budget, serialized as milliseconds.
    #[serde(with = "duration_millis", rename = "timeMs")]
    pub time: Duration,
    /// Budget on serialized bytes produced.
    pub memory: u64,
}

impl Default for QueryQuota {
    fn default() -> Self {
        Self {
            time: Duration::from_secs(60),
            memory: 8 * 1024 * 1024,
        }
    }
}

impl QueryQuota {
    pub fn new(time: Duration, memory: u64) -> Self {
        Self { time, memory }
    }
}

/// Configuration of one manager instance. Retrieved and replaced per store
/// handle; a change applies to subsequently enqueued requests, never to
/// ones already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    pub quota: QueryQuota,
    pub worker_threads: usize,
    /// Bypass injected request delays (deterministic tests, or disabling
    /// caller-side throttling).
    pub ignore_delay: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            quota: QueryQuota::default(),
            worker_threads: 4,
            ignore_delay: false,
        }
    }
}

impl QueryConfig {
    pub fn with_quota(mut self, quota: QueryQuota) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count.max(1);
        self
    }

    pub fn with_ignore_delay(mut self, ignore: bool) -> Self {
        self.ignore_delay = ignore;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

// Engine Configuration
// Tunables for the orchestration engine and its background sweeps

use serde::Deserialize;

use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Configuration for the orchestration engine
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Read-modify-write attempts before a version conflict is surfaced
    pub max_version_retries: u32,
    /// How long an early notify waits for its binding (milliseconds)
    pub notify_ttl_ms: u64,
    /// Interval of the timeout and pending-notify sweep (milliseconds)
    pub sweep_interval_ms: u64,
    /// Interval between interrupt processing passes (milliseconds)
    pub interrupt_poll_interval_ms: u64,
    /// Interval of the consistency sweep (milliseconds)
    pub consistency_sweep_interval_ms: u64,
    /// Age after which an unwatched RUNNING node is errored out (milliseconds)
    pub stale_node_threshold_ms: u64,
    /// Intervention timeout used when the adviser does not set one (milliseconds)
    pub default_intervention_timeout_ms: u64,
    /// Maximum concurrently running async observer handlers
    pub async_observer_workers: usize,
    /// Number of message ids remembered by the notify consumer
    pub notify_dedupe_window: usize,
    /// How long a suspended TASK/ASYNC node waits for its notify before it
    /// expires (milliseconds, 0 disables)
    pub correlation_ttl_ms: u64,
    /// How long terminal plan executions are kept before archiving (milliseconds)
    pub plan_retention_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_version_retries: 5,
            notify_ttl_ms: 60_000,
            sweep_interval_ms: 500,
            interrupt_poll_interval_ms: 200,
            consistency_sweep_interval_ms: 30_000,
            stale_node_threshold_ms: 300_000,
            default_intervention_timeout_ms: 3_600_000,
            async_observer_workers: 8,
            notify_dedupe_window: 4096,
            correlation_ttl_ms: 86_400_000,
            plan_retention_ms: 86_400_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML (or JSON) file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Store(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text; missing keys keep their defaults
    pub fn from_yaml(content: &str) -> EngineResult<Self> {
        serde_yaml::from_str(content).map_err(|e| EngineError::Store(format!("config: {}", e)))
    }

    pub fn with_max_version_retries(mut self, retries: u32) -> Self {
        self.max_version_retries = retries.max(1);
        self
    }

    pub fn with_notify_ttl(mut self, ttl: Duration) -> Self {
        self.notify_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_stale_node_threshold(mut self, threshold: Duration) -> Self {
        self.stale_node_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_default_intervention_timeout(mut self, timeout: Duration) -> Self {
        self.default_intervention_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_correlation_ttl(mut self, ttl: Duration) -> Self {
        self.correlation_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_plan_retention(mut self, retention: Duration) -> Self {
        self.plan_retention_ms = retention.as_millis() as u64;
        self
    }

    pub fn notify_ttl(&self) -> Duration {
        Duration::from_millis(self.notify_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn interrupt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.interrupt_poll_interval_ms.max(1))
    }

    pub fn consistency_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.consistency_sweep_interval_ms.max(1))
    }

    pub fn stale_node_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_node_threshold_ms)
    }

    pub fn default_intervention_timeout(&self) -> Duration {
        Duration::from_millis(self.default_intervention_timeout_ms)
    }

    pub fn correlation_ttl(&self) -> Option<Duration> {
        (self.correlation_ttl_ms > 0).then(|| Duration::from_millis(self.correlation_ttl_ms))
    }

    pub fn plan_retention(&self) -> Duration {
        Duration::from_millis(self.plan_retention_ms)
    }
}

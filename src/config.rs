//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scheduler tick: how often due-ness is re-evaluated
    pub tick_interval: Duration,

    /// Retention sweep cadence
    pub sweep_interval: Duration,

    /// How often a draining batch is polled for completion/cancellation
    pub drain_poll_interval: Duration,

    /// Root directory for persisted enumeration snapshots
    pub snapshot_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600), // hourly
            drain_poll_interval: Duration::from_millis(50),
            snapshot_dir: PathBuf::from("./snapshots"),
        }
    }
}

impl EngineConfig {
    /// Create a new config builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set scheduler tick interval in seconds
    pub fn tick_interval_secs(mut self, secs: u64) -> Self {
        self.config.tick_interval = Duration::from_secs(secs);
        self
    }

    /// Set sweep interval
    pub fn sweep_interval(mut self, duration: Duration) -> Self {
        self.config.sweep_interval = duration;
        self
    }

    /// Set drain poll interval
    pub fn drain_poll_interval(mut self, duration: Duration) -> Self {
        self.config.drain_poll_interval = duration;
        self
    }

    /// Set snapshot directory
    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.snapshot_dir = dir.into();
        self
    }

    /// Build the config
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

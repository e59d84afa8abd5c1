//! Root configuration for a pipeline deployment.
//!
//! Load with `PipelineConfig::load()` which searches:
//! 1. `$RACE_PIPELINE_CONFIG` env var
//! 2. `./pipeline_config.toml`
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub das: DasConfig,
    #[serde(default)]
    pub pt: PtConfig,
    #[serde(default)]
    pub ted: TedConfig,
    #[serde(default)]
    pub eb: EbConfig,
    #[serde(default)]
    pub wsm: WsmConfig,
    #[serde(default)]
    pub dns: DnsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crm: CrmConfig::default(),
            das: DasConfig::default(),
            pt: PtConfig::default(),
            ted: TedConfig::default(),
            eb: EbConfig::default(),
            wsm: WsmConfig::default(),
            dns: DnsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("RACE_PIPELINE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "loaded pipeline config from RACE_PIPELINE_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "failed to load config from RACE_PIPELINE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "RACE_PIPELINE_CONFIG points to a non-existent file, falling back");
            }
        }

        let local = PathBuf::from("pipeline_config.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("loaded pipeline config from ./pipeline_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "failed to load ./pipeline_config.toml, using defaults");
                }
            }
        }

        info!("no pipeline_config.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path, validating ranges afterward.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: PipelineConfig = toml::from_str(&raw)?;
        let (validated, warnings) = super::validation::validate(parsed);
        for w in warnings {
            warn!(%w, "config validation warning");
        }
        Ok(validated)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// CRM — Connection Resilience Manager
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrmConfig {
    pub health_check_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub failover_timeout_ms: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
    pub failure_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,
    pub duplicate_detection_window_ms: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: HEALTH_CHECK_INTERVAL_MS,
            connection_timeout_ms: CONNECTION_TIMEOUT_MS,
            failover_timeout_ms: FAILOVER_TIMEOUT_MS,
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            retry_delay_ms: RETRY_DELAY_MS,
            backoff_multiplier: BACKOFF_MULTIPLIER,
            max_retry_delay_ms: MAX_RETRY_DELAY_MS,
            failure_threshold: FAILURE_THRESHOLD,
            circuit_breaker_timeout_ms: CIRCUIT_BREAKER_TIMEOUT_MS,
            duplicate_detection_window_ms: DUPLICATE_DETECTION_WINDOW_MS,
        }
    }
}

impl CrmConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
    pub fn failover_timeout(&self) -> Duration {
        Duration::from_millis(self.failover_timeout_ms)
    }
    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_timeout_ms)
    }
}

// ============================================================================
// DAS — Data Aggregation Service
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DasConfig {
    pub aggregation_window_ms: u64,
    pub max_data_age_ms: u64,
    pub conflict_threshold: f64,
    pub min_sources: usize,
    pub drift_threshold: f64,
}

impl Default for DasConfig {
    fn default() -> Self {
        Self {
            aggregation_window_ms: AGGREGATION_WINDOW_MS,
            max_data_age_ms: MAX_DATA_AGE_MS,
            conflict_threshold: CONFLICT_THRESHOLD,
            min_sources: MIN_SOURCES,
            drift_threshold: DRIFT_THRESHOLD,
        }
    }
}

impl DasConfig {
    pub fn aggregation_window(&self) -> Duration {
        Duration::from_millis(self.aggregation_window_ms)
    }
    pub fn max_data_age(&self) -> Duration {
        Duration::from_millis(self.max_data_age_ms)
    }
}

// ============================================================================
// PT — Position Tracker
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PtConfig {
    pub update_interval_ms: u64,
    pub position_timeout_ms: u64,
    pub group_distance_threshold_m: f64,
    pub group_time_threshold_s: f64,
    pub max_interpolation_time_s: f64,
    pub min_interpolation_time_s: f64,
}

impl Default for PtConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: UPDATE_INTERVAL_MS,
            position_timeout_ms: POSITION_TIMEOUT_MS,
            group_distance_threshold_m: GROUP_DISTANCE_THRESHOLD_M,
            group_time_threshold_s: GROUP_TIME_THRESHOLD_S,
            max_interpolation_time_s: MAX_INTERPOLATION_TIME_S,
            min_interpolation_time_s: MIN_INTERPOLATION_TIME_S,
        }
    }
}

impl PtConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }
}

// ============================================================================
// TED — Tactical Event Detector
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TedConfig {
    pub detection_interval_ms: u64,
    pub confidence_threshold: f64,
    pub event_retention_s: u64,
}

impl Default for TedConfig {
    fn default() -> Self {
        Self {
            detection_interval_ms: DETECTION_INTERVAL_MS,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            event_retention_s: EVENT_RETENTION_S,
        }
    }
}

impl TedConfig {
    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }
    pub fn event_retention(&self) -> Duration {
        Duration::from_secs(self.event_retention_s)
    }
}

// ============================================================================
// EB — Event Bus
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EbConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub max_concurrent_updates: usize,
    pub default_partition_count: usize,
    pub producer_queue_capacity: usize,
}

impl Default for EbConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            batch_timeout_ms: BATCH_TIMEOUT_MS,
            max_concurrent_updates: MAX_CONCURRENT_UPDATES,
            default_partition_count: DEFAULT_PARTITION_COUNT,
            producer_queue_capacity: PRODUCER_QUEUE_CAPACITY,
        }
    }
}

impl EbConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

// ============================================================================
// WSM — WebSocket Fanout
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WsmConfig {
    pub heartbeat_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: u32,
    pub max_connections: usize,
    pub shutdown_grace_ms: u64,
    pub shutdown_reconnect_delay_ms: u64,
}

impl Default for WsmConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            connection_timeout_ms: WSM_CONNECTION_TIMEOUT_MS,
            rate_limit_window_ms: RATE_LIMIT_WINDOW_MS,
            rate_limit_max: RATE_LIMIT_MAX,
            max_connections: MAX_CONNECTIONS,
            shutdown_grace_ms: SHUTDOWN_GRACE_MS,
            shutdown_reconnect_delay_ms: SHUTDOWN_RECONNECT_DELAY_MS,
        }
    }
}

impl WsmConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
    pub fn shutdown_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_reconnect_delay_ms)
    }
}

// ============================================================================
// DNS — Notification Dispatcher
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnsConfig {
    pub cleanup_interval_ms: u64,
    pub max_idle_time_ms: u64,
    pub default_max_notifications_per_minute: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: NOTIFICATION_CLEANUP_INTERVAL_MS,
            max_idle_time_ms: MAX_IDLE_TIME_MS,
            default_max_notifications_per_minute: DEFAULT_MAX_NOTIFICATIONS_PER_MINUTE,
        }
    }
}

impl DnsConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }
}

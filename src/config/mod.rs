//! Pipeline configuration module
//!
//! Provides the single process-wide `PipelineConfig`, replacing all
//! hardcoded subsystem thresholds with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `RACE_PIPELINE_CONFIG` environment variable (path to TOML file)
//! 2. `pipeline_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(PipelineConfig::load());
//! let threshold = config::get().das.min_sources;
//! ```

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;

use std::sync::OnceLock;

/// Global pipeline configuration, initialized once at startup.
static PIPELINE_CONFIG: OnceLock<PipelineConfig> = OnceLock::new();

/// Initialize the global pipeline configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: PipelineConfig) {
    if PIPELINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global pipeline configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static PipelineConfig {
    PIPELINE_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    PIPELINE_CONFIG.get().is_some()
}

//! Layered configuration for the runner.

use serde::Deserialize;

use crate::error::RunnerError;

/// Reserved dependency id for the single aggregate output slot.
pub const DEFAULT_AGG_DEPID: u32 = 1;

/// Default maximum pending-queue size dispatched per sub-batch; must match
/// the engine-side constant of the same name.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 200;

/// Tunables for a runner instance. Loadable via the `config` crate from
/// layered TOML/environment sources, or constructed directly with
/// `RunnerConfig::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Upper bound on statements dispatched in a single fast/slow-path call
    /// before the batch executor splits into sequential sub-batches.
    pub max_batch_size: usize,
    /// Reserved dependency id for the legacy single aggregate output slot.
    pub agg_depid: u32,
    /// Whether a determinism-CRC parameter-serialization IO error aborts the
    /// invocation (`true`) or is logged and swallowed (`false`). See
    /// DESIGN.md for the rationale behind defaulting to `true`.
    pub fail_closed_on_hash_io_error: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            agg_depid: DEFAULT_AGG_DEPID,
            fail_closed_on_hash_io_error: true,
        }
    }
}

impl RunnerConfig {
    /// Load configuration layered from a base TOML file, an optional
    /// environment-specific TOML file, and `RUNNER_`-prefixed environment
    /// variables, following the corpus's layered-config convention.
    pub fn load(base_path: &str, env_prefix: &str) -> Result<Self, RunnerError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(base_path).required(false))
            .add_source(config::Environment::with_prefix(env_prefix).separator("__"))
            .build()
            .map_err(|e| RunnerError::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| RunnerError::InvalidConfig(e.to_string()))
    }
}

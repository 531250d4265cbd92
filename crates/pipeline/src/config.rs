//! Batch execution settings.

use std::time::Duration;

use shorts_core::config::{parse_or, process_env, ConfigError};
use shorts_core::retry::RetryPolicy;

/// Worker pool width, retry policy, and per-call timeout for batch runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Default worker pool width when a request does not specify one.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Upper bound on a single adapter call.
    pub adapter_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            retry: RetryPolicy::default(),
            adapter_timeout: Duration::from_secs(600),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `BATCH_CONCURRENCY`        | `10`    |
    /// | `BATCH_MAX_RETRIES`        | `3`     |
    /// | `BATCH_BACKOFF_INITIAL_MS` | `1000`  |
    /// | `BATCH_BACKOFF_MAX_MS`     | `30000` |
    /// | `BATCH_BACKOFF_MULTIPLIER` | `2.0`   |
    /// | `ADAPTER_TIMEOUT_SECS`     | `600`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let concurrency: usize = parse_or(&lookup, "BATCH_CONCURRENCY", 10)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "BATCH_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let retry = RetryPolicy {
            max_retries: parse_or(&lookup, "BATCH_MAX_RETRIES", 3)?,
            initial_backoff: Duration::from_millis(parse_or(&lookup, "BATCH_BACKOFF_INITIAL_MS", 1000)?),
            max_backoff: Duration::from_millis(parse_or(&lookup, "BATCH_BACKOFF_MAX_MS", 30_000)?),
            multiplier: parse_or(&lookup, "BATCH_BACKOFF_MULTIPLIER", 2.0)?,
        };
        retry.validate().map_err(|e| ConfigError::Invalid {
            var: "BATCH_BACKOFF_*",
            value: format!("{retry:?}"),
            reason: e.to_string(),
        })?;

        let timeout_secs: u64 = parse_or(&lookup, "ADAPTER_TIMEOUT_SECS", 600)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "ADAPTER_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            concurrency,
            retry,
            adapter_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

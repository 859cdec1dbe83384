// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::DagGraph;
use crate::errors::{NightdagError, Result};
use crate::types::RetryStrategyKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = NightdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_retry_config(cfg)?;
    validate_tasks(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(NightdagError::ConfigError(
            "config must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_parallel == 0 {
        return Err(NightdagError::ConfigError(
            "[config].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_retry_config(cfg: &RawConfigFile) -> Result<()> {
    let retry = &cfg.retry;
    if retry.strategy == RetryStrategyKind::Exponential {
        if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
            return Err(NightdagError::ConfigError(format!(
                "[retry].multiplier must be a finite number >= 1.0 (got {})",
                retry.multiplier
            )));
        }
        if retry.max_delay.as_duration() < retry.delay.as_duration() {
            return Err(NightdagError::ConfigError(format!(
                "[retry].max_delay ({}) must not be shorter than [retry].delay ({})",
                retry.max_delay, retry.delay
            )));
        }
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.default.max_attempts == Some(0) {
        return Err(NightdagError::ConfigError(
            "[default].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }

    for (name, task) in cfg.task.iter() {
        if task.cmd.trim().is_empty() {
            return Err(NightdagError::ConfigError(format!(
                "task '{}' has an empty `cmd`",
                name
            )));
        }
        if task.effective_timeout(&cfg.default).is_zero() {
            return Err(NightdagError::ConfigError(format!(
                "task '{}' has a zero `timeout`",
                name
            )));
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Unknown deps, self deps, cycles and zero attempt budgets are all
    // rejected by the graph builder.
    DagGraph::build(cfg.task_specs()).map(|_| ())
}

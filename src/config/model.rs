// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::spec::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT};
use crate::dag::TaskSpec;
use crate::types::{CheckpointMode, HumanDuration, RetryStrategyKind};

/// Workflow file exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// max_parallel = 4
///
/// [retry]
/// strategy = "fixed"
/// delay = "10s"
///
/// [default]
/// max_attempts = 3
///
/// [task.collect]
/// cmd = "python collect.py"
///
/// [task.train]
/// cmd = "python train.py"
/// after = ["collect"]
/// fatal = false
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub default: DefaultSection,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

impl RawConfigFile {
    /// Task specs with `[default]` applied.
    pub fn task_specs(&self) -> Vec<TaskSpec> {
        self.task
            .iter()
            .map(|(id, task)| task.to_spec(id, &self.default))
            .collect()
    }
}

/// Validated workflow file. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub retry: RetrySection,
    pub default: DefaultSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            retry: raw.retry,
            default: raw.default,
            task: raw.task,
        }
    }

    /// Task specs with `[default]` applied.
    pub fn task_specs(&self) -> Vec<TaskSpec> {
        self.task
            .iter()
            .map(|(id, task)| task.to_spec(id, &self.default))
            .collect()
    }
}

/// `[config]` section: engine-wide behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of task attempts in flight at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Directory holding checkpoint logs and archived runs. Relative paths
    /// are resolved against the config file's directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub checkpoint: CheckpointMode,

    /// How long a stop waits for in-flight workers before abandoning them.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: HumanDuration,
}

fn default_max_parallel() -> usize {
    4
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".nightdag")
}

fn default_shutdown_grace() -> HumanDuration {
    HumanDuration(Duration::from_secs(30))
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            state_dir: default_state_dir(),
            checkpoint: CheckpointMode::default(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// `[retry]` section: which retry policy to use and its parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub strategy: RetryStrategyKind,

    /// Fixed delay, or the base delay for `exponential`.
    #[serde(default = "default_retry_delay")]
    pub delay: HumanDuration,

    /// Upper bound for `exponential`.
    #[serde(default = "default_retry_max_delay")]
    pub max_delay: HumanDuration,

    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
}

fn default_retry_delay() -> HumanDuration {
    HumanDuration(Duration::from_secs(10))
}

fn default_retry_max_delay() -> HumanDuration {
    HumanDuration(Duration::from_secs(10 * 60))
}

fn default_retry_multiplier() -> f64 {
    2.0
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyKind::default(),
            delay: default_retry_delay(),
            max_delay: default_retry_max_delay(),
            multiplier: default_retry_multiplier(),
        }
    }
}

/// `[default]` section: values applied to tasks that do not set their own.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    #[serde(default)]
    pub fatal: Option<bool>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub timeout: Option<HumanDuration>,
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to execute (`sh -c` on unix, `cmd /C` on windows).
    pub cmd: String,

    /// Dependency list: this task waits for all tasks listed here to succeed.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub fatal: Option<bool>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub timeout: Option<HumanDuration>,

    /// Extra environment variables for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl TaskConfig {
    pub fn effective_fatal(&self, defaults: &DefaultSection) -> bool {
        self.fatal.or(defaults.fatal).unwrap_or(true)
    }

    pub fn effective_max_attempts(&self, defaults: &DefaultSection) -> u32 {
        self.max_attempts
            .or(defaults.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn effective_timeout(&self, defaults: &DefaultSection) -> Duration {
        self.timeout
            .or(defaults.timeout)
            .map(|d| d.as_duration())
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn to_spec(&self, id: &str, defaults: &DefaultSection) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            depends_on: self.after.iter().cloned().collect(),
            fatal: self.effective_fatal(defaults),
            max_attempts: self.effective_max_attempts(defaults),
            timeout: self.effective_timeout(defaults),
        }
    }
}

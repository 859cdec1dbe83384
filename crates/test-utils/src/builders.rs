#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use nightdag::config::{
    ConfigFile, ConfigSection, DefaultSection, RawConfigFile, RetrySection, TaskConfig,
};
use nightdag::errors::Result;
use nightdag::types::{HumanDuration, RetryStrategyKind};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                retry: RetrySection::default(),
                default: DefaultSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.config.max_parallel = n;
        self
    }

    pub fn retry(mut self, strategy: RetryStrategyKind, delay: Duration) -> Self {
        self.config.retry.strategy = strategy;
        self.config.retry.delay = HumanDuration(delay);
        self
    }

    pub fn default_fatal(mut self, fatal: bool) -> Self {
        self.config.default.fatal = Some(fatal);
        self
    }

    pub fn default_max_attempts(mut self, n: u32) -> Self {
        self.config.default.max_attempts = Some(n);
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                fatal: None,
                max_attempts: None,
                timeout: None,
                env: BTreeMap::new(),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn fatal(mut self, val: bool) -> Self {
        self.task.fatal = Some(val);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.task.max_attempts = Some(n);
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.task.timeout = Some(HumanDuration(d));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

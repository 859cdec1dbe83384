// src/config/mod.rs

//! Configuration loading and validation for nightdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate it into a [`ConfigFile`] (`validate.rs`), so that graph errors
//!   surface before any run state exists.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, DefaultSection, RawConfigFile, RetrySection, TaskConfig,
};

// src/config/mod.rs

//! Configuration loading and validation for stagehand.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate stage graph and pooled stage invariants (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, ConfigSection, GroupSpec, ItemSpec, RawConfigFile, StageConfig, UnitSpec,
};

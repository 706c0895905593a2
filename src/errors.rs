// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Losing a claim race is not an error (see `ClaimOutcome::Lost`), and crash
//! residue is reported by reconciliation as `OrphanedClaim` records rather
//! than surfaced here.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::UnitStatus;

#[derive(Error, Debug)]
pub enum StagehandError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Cycle detected in stage graph: {0}")]
    StageCycle(String),

    #[error(
        "unmet dependency: stage '{stage}' group '{group}' waits on {waiting} unit(s) of stage '{upstream}'"
    )]
    UnmetDependency {
        stage: String,
        group: String,
        upstream: String,
        waiting: usize,
    },

    #[error("missing artifact {path:?} required by {unit}")]
    MissingArtifact { unit: String, path: PathBuf },

    #[error("cannot partition items: {0}")]
    PartitionError(String),

    #[error("invalid transition for {artifact}: {from:?} -> {to:?}")]
    InvalidTransition {
        artifact: String,
        from: UnitStatus,
        to: UnitStatus,
    },

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("operation for {unit} failed: {reason}")]
    ExecutionFailed { unit: String, reason: String },

    #[error("store connection lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StagehandError>;

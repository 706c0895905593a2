// src/exec/backend.rs

//! Executor abstraction.
//!
//! The scheduler hands an [`Operation`] to an [`Executor`] between claim and
//! commit. Production uses [`super::ShellExecutor`]; tests plug in a fake
//! that records operations and creates outputs without spawning processes.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use crate::types::{GroupKey, StageName, UnitKind};

/// One external operation for a claimed unit, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub stage: StageName,
    pub artifact: PathBuf,
    pub group: GroupKey,
    pub kind: UnitKind,
    pub command: String,
    pub inputs: Vec<PathBuf>,
    /// Artifact first, then auxiliary outputs.
    pub outputs: Vec<PathBuf>,
    /// Write a checksum sidecar for the artifact after success.
    pub checksum: bool,
}

/// Performs operations and reports success or failure. Never touches the
/// store; the scheduler owns every status transition.
pub trait Executor: Send + Sync {
    fn execute(&self, op: &Operation) -> Result<()>;
}

// src/sched/planning.rs

//! Dry-run support: an executor that records operations instead of running
//! them, and the manifest it produces.
//!
//! A planning session runs the normal scheduler against a store snapshot
//! with a [`PlanRecorder`] as executor, so every claim commits on the
//! snapshot and later stages in the same session see their upstream work
//! as done. See `Scheduler::plan_stages`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::Result as AnyResult;
use serde::Serialize;

use crate::errors::Result;
use crate::exec::{Executor, Operation};
use crate::types::GroupKey;

/// One planned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// `"<stage> <artifact>"`.
    pub description: String,
    pub command: String,
    pub group: GroupKey,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

impl From<&Operation> for ManifestEntry {
    fn from(op: &Operation) -> Self {
        Self {
            description: format!("{} {}", op.stage, op.artifact.display()),
            command: op.command.clone(),
            group: op.group.clone(),
            inputs: op.inputs.clone(),
            outputs: op.outputs.clone(),
        }
    }
}

/// Planned operations in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// Human-readable trace: one command per line.
    pub fn write_trace(&self, mut out: impl Write) -> Result<()> {
        for entry in self.entries.iter() {
            writeln!(out, "{}", entry.command)?;
        }
        Ok(())
    }
}

/// Executor that only records what would run.
#[derive(Debug, Default)]
pub struct PlanRecorder {
    entries: Mutex<Vec<ManifestEntry>>,
}

impl PlanRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take_manifest(&self) -> Manifest {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Manifest {
            entries: std::mem::take(&mut *entries),
        }
    }
}

impl Executor for PlanRecorder {
    fn execute(&self, op: &Operation) -> AnyResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ManifestEntry::from(op));
        Ok(())
    }
}

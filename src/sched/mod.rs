// src/sched/mod.rs

//! Task-state scheduling.
//!
//! - [`claim`] is the unit state machine (claim, commit, retire).
//! - [`compensation`] registers undo records and reconciles orphans.
//! - [`fan_in`] decides when a merge may run.
//! - [`pools`] partitions weighted items into balanced pools.
//! - [`planning`] records operations for dry runs.
//! - [`worker_pool`] runs independent groups in parallel.
//! - [`scheduler`] ties them together over an injected store.

pub mod claim;
pub mod compensation;
pub mod fan_in;
pub mod filter;
pub mod planning;
pub mod pools;
pub mod scheduler;
pub mod stage_graph;
pub mod worker_pool;

pub use claim::ClaimOutcome;
pub use compensation::{OrphanedClaim, ReconcileReport};
pub use filter::UnitFilter;
pub use planning::{Manifest, ManifestEntry, PlanRecorder};
pub use pools::{Pool, WeightedItem};
pub use scheduler::{Claimed, RunOptions, Scheduler, StageReport, UnitFailure};
pub use stage_graph::StageGraph;
pub use worker_pool::WorkerPool;

// src/exec/mod.rs

//! External operation layer.
//!
//! - [`backend`] defines [`Operation`] and the [`Executor`] trait the
//!   scheduler calls between claim and commit.
//! - [`command`] holds the shell-based production executor.
//! - [`checksum`] writes `blake3` sidecars for finished artifacts.

pub mod backend;
pub mod checksum;
pub mod command;

pub use backend::{Executor, Operation};
pub use command::{ShellExecutor, stderr_path};

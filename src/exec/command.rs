// src/exec/command.rs

//! Production executor: runs the resolved command through the shell.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::backend::{Executor, Operation};
use super::checksum;
use crate::fs::FileSystem;

/// Where a unit's stderr is kept: `<artifact>.err`.
pub fn stderr_path(artifact: &Path) -> PathBuf {
    let mut name: OsString = artifact.as_os_str().to_owned();
    name.push(".err");
    PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct ShellExecutor {
    fs: Arc<dyn FileSystem>,
}

impl ShellExecutor {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        }
    }
}

impl Executor for ShellExecutor {
    fn execute(&self, op: &Operation) -> Result<()> {
        info!(
            stage = %op.stage,
            artifact = ?op.artifact,
            cmd = %op.command,
            "starting operation"
        );

        if let Some(parent) = op.artifact.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating output dir {:?}", parent))?;
            }
        }

        let output = Self::shell(&op.command)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("spawning process for {:?}", op.artifact))?;

        let err_log = stderr_path(&op.artifact);
        self.fs.write(&err_log, &output.stderr)?;

        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            let last = String::from_utf8_lossy(&output.stderr)
                .lines()
                .last()
                .unwrap_or("")
                .to_string();
            warn!(artifact = ?op.artifact, exit_code = code, stderr = %last, "operation failed");
            bail!("command exited with code {code} (see {:?})", err_log);
        }

        if !self.fs.exists(&op.artifact) {
            bail!("command succeeded but did not create {:?}", op.artifact);
        }

        if op.checksum {
            checksum::write_sidecar(self.fs.as_ref(), &op.artifact)?;
        }

        debug!(artifact = ?op.artifact, exit_code = code, "operation finished");
        Ok(())
    }
}

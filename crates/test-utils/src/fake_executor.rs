use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use stagehand::exec::{Executor, Operation};
use stagehand::fs::FileSystem;
use stagehand::fs::mock::MockFileSystem;

/// A fake executor that:
/// - records every operation it was given, in order
/// - "creates" each declared output in a `MockFileSystem`
/// - fails for artifacts registered with [`FakeExecutor::fail_on`], after
///   writing a partial artifact, like a real crashed command would.
#[derive(Debug, Clone, Default)]
pub struct FakeExecutor {
    fs: MockFileSystem,
    executed: Arc<Mutex<Vec<Operation>>>,
    failing: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl FakeExecutor {
    pub fn new(fs: MockFileSystem) -> Self {
        Self {
            fs,
            ..Self::default()
        }
    }

    pub fn fail_on(&self, artifact: impl AsRef<Path>) {
        self.failing
            .lock()
            .unwrap()
            .insert(artifact.as_ref().to_path_buf());
    }

    pub fn executed(&self) -> Vec<Operation> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed_artifacts(&self) -> Vec<PathBuf> {
        self.executed().into_iter().map(|op| op.artifact).collect()
    }
}

impl Executor for FakeExecutor {
    fn execute(&self, op: &Operation) -> Result<()> {
        self.executed.lock().unwrap().push(op.clone());

        if self.failing.lock().unwrap().contains(&op.artifact) {
            self.fs.write(&op.artifact, b"partial")?;
            bail!("simulated failure for {:?}", op.artifact);
        }

        for output in op.outputs.iter() {
            self.fs.write(output, op.command.as_bytes())?;
        }
        Ok(())
    }
}

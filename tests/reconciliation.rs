// tests/reconciliation.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stagehand::exec::{ShellExecutor, stderr_path};
use stagehand::fs::RealFileSystem;
use stagehand::layout::PipelineLayout;
use stagehand::sched::compensation::{reconcile, rollback};
use stagehand::sched::{RunOptions, Scheduler, StageGraph, UnitFilter, claim};
use stagehand::store::{Store, WorkUnit};
use stagehand::types::{UnitKind, UnitStatus};
use stagehand_test_utils::builders::{ConfigFileBuilder, StageConfigBuilder};
use stagehand_test_utils::init_tracing;
use tempfile::{TempDir, tempdir};

struct Workspace {
    dir: TempDir,
    db: PathBuf,
}

impl Workspace {
    fn new(artifacts: &[&str]) -> Self {
        let dir = tempdir().unwrap();
        let db = dir.path().join("stagehand.db");
        let ws = Self { dir, db };
        let units: Vec<WorkUnit> = artifacts
            .iter()
            .map(|a| WorkUnit::new("map", ws.path(a), "S", UnitKind::Leaf))
            .collect();
        ws.open().register_units(&units).unwrap();
        ws
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn open(&self) -> Store {
        Store::open(&self.db, Duration::from_secs(5)).unwrap()
    }

    fn status(&self, store: &Store, name: &str) -> UnitStatus {
        store.get_unit(&self.path(name)).unwrap().unwrap().status
    }
}

#[test]
fn crashed_claim_is_reset_and_partial_output_removed() {
    init_tracing();
    let ws = Workspace::new(&["out"]);
    let out = ws.path("out");
    let partial = ws.path("out.partial");

    {
        let runner = ws.open();
        let outcome = claim::claim(&runner, &out, &[partial.clone()], false).unwrap();
        assert!(outcome.claimed().is_some());
        fs::write(&partial, b"half written").unwrap();
        // Runner dies here: no commit, no rollback.
    }

    let store = ws.open();
    assert_eq!(ws.status(&store, "out"), UnitStatus::Claimed);

    let report = reconcile(&store, &RealFileSystem).unwrap();
    assert_eq!(report.resolved.len(), 1);
    let orphan = &report.resolved[0];
    assert_eq!(orphan.artifact_path, out);
    assert_eq!(orphan.status_before, Some(UnitStatus::Claimed));
    // `out` itself never existed, so only the partial file was removed.
    assert_eq!(orphan.removed_guards, vec![partial.clone()]);

    assert!(!partial.exists());
    assert_eq!(ws.status(&store, "out"), UnitStatus::Pending);
    assert!(store.compensations().unwrap().is_empty());
}

#[test]
fn reconcile_twice_is_the_same_as_once() {
    let ws = Workspace::new(&["a", "b"]);
    let store = ws.open();
    claim::claim(&store, &ws.path("a"), &[], false).unwrap();
    claim::claim(&store, &ws.path("b"), &[], false).unwrap();
    fs::write(ws.path("a"), b"junk").unwrap();

    let first = reconcile(&store, &RealFileSystem).unwrap();
    assert_eq!(first.resolved.len(), 2);
    let after_first = store.dump().unwrap();

    let second = reconcile(&store, &RealFileSystem).unwrap();
    assert!(second.is_empty());
    assert_eq!(store.dump().unwrap(), after_first);
    assert!(!ws.path("a").exists());
}

#[test]
fn committed_units_are_left_alone() {
    let ws = Workspace::new(&["done", "orphan"]);
    let store = ws.open();

    claim::claim(&store, &ws.path("done"), &[], false).unwrap();
    fs::write(ws.path("done"), b"result").unwrap();
    claim::commit(&store, &ws.path("done")).unwrap();

    claim::claim(&store, &ws.path("orphan"), &[], false).unwrap();

    let report = reconcile(&store, &RealFileSystem).unwrap();
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved[0].artifact_path, ws.path("orphan"));

    assert_eq!(ws.status(&store, "done"), UnitStatus::Done);
    assert!(ws.path("done").exists());
    assert_eq!(ws.status(&store, "orphan"), UnitStatus::Pending);
}

#[test]
fn rollback_of_failed_operation_allows_a_retry() {
    let ws = Workspace::new(&["out"]);
    let store = ws.open();
    let out = ws.path("out");

    claim::claim(&store, &out, &[], false).unwrap();
    fs::write(&out, b"truncated").unwrap();

    assert!(rollback(&store, &RealFileSystem, &out, &[]).unwrap());
    assert!(!out.exists());
    assert_eq!(ws.status(&store, "out"), UnitStatus::Pending);

    // Nothing left to undo.
    assert!(!rollback(&store, &RealFileSystem, &out, &[]).unwrap());

    let retry = claim::claim(&store, &out, &[], false).unwrap();
    assert!(retry.claimed().is_some());
}

#[test]
fn reconcile_with_nothing_claimed_is_a_no_op() {
    let ws = Workspace::new(&["out"]);
    let store = ws.open();
    let report = reconcile(&store, &RealFileSystem).unwrap();
    assert!(report.is_empty());
    assert_eq!(ws.status(&store, "out"), UnitStatus::Pending);
    assert!(!Path::new(&ws.path("out")).exists());
}

#[cfg(unix)]
#[test]
fn failed_command_keeps_its_stderr_log() {
    init_tracing();
    let dir = tempdir().unwrap();
    let out = dir.path().join("out/a.txt");
    let cfg = ConfigFileBuilder::new()
        .with_stage(
            "map",
            StageConfigBuilder::new("echo diagnostic-line >&2; exit 3")
                .leaf(out.to_str().unwrap(), "S", &[])
                .build(),
        )
        .build();

    let store = Arc::new(Store::open_in_memory().unwrap());
    let layout = Arc::new(PipelineLayout::from_config(&cfg).unwrap());
    layout.prepare(&store, &RealFileSystem).unwrap();
    let sched = Scheduler::new(
        Arc::clone(&store),
        layout,
        Arc::new(ShellExecutor::new(Arc::new(RealFileSystem))),
        Arc::new(RealFileSystem),
        StageGraph::from_config(&cfg),
        RunOptions::default(),
    )
    .unwrap();

    let report = sched.run_stage("map", &UnitFilter::all()).unwrap();
    assert_eq!(report.failed.len(), 1);

    let err_log = stderr_path(&out);
    let logged = fs::read_to_string(&err_log).unwrap();
    assert!(logged.contains("diagnostic-line"));
    assert!(!out.exists());
    assert_eq!(store.get_unit(&out).unwrap().unwrap().status, UnitStatus::Pending);
    assert!(store.compensations().unwrap().is_empty());
}

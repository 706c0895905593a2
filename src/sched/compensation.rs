// src/sched/compensation.rs

//! Crash recovery through compensation records.
//!
//! A record is registered in the same transaction that claims a unit and
//! removed by the commit. Whatever records remain belong to runs that
//! failed or died; [`reconcile`] resolves them. It is operator-invoked and
//! must not overlap live scheduling.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::store::{
    self, CompensationRecord, Store, delete_compensation, select_compensation,
    select_compensations, select_unit,
};
use crate::types::UnitStatus;

/// A claim left behind by a run that never committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedClaim {
    pub artifact_path: PathBuf,
    /// Status seen just before the undo ran; `None` if the row is gone.
    pub status_before: Option<UnitStatus>,
    pub removed_guards: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub resolved: Vec<OrphanedClaim>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Remove guard files not listed in `keep`, apply the undo statement and
/// drop the record.
fn apply(
    conn: &Connection,
    fs: &dyn FileSystem,
    record: &CompensationRecord,
    keep: &[PathBuf],
) -> Result<OrphanedClaim> {
    let mut removed = Vec::new();
    for guard in record.guard_files.iter() {
        if keep.contains(guard) {
            continue;
        }
        if fs.remove_file(guard)? {
            removed.push(guard.clone());
        }
    }

    let status_before = select_unit(conn, &record.artifact_path)?.map(|u| u.status);
    let key = store::path_key(&record.artifact_path);
    conn.execute(&record.undo_statement, [key.as_str()])?;
    delete_compensation(conn, &record.artifact_path)?;

    debug!(
        artifact = %key,
        removed = removed.len(),
        status_before = ?status_before,
        "compensation applied"
    );

    Ok(OrphanedClaim {
        artifact_path: record.artifact_path.clone(),
        status_before,
        removed_guards: removed,
    })
}

/// Undo one claim after its operation failed, leaving the guard files in
/// `keep`. Returns `false` when the unit has no compensation record.
pub fn rollback(
    store: &Store,
    fs: &dyn FileSystem,
    artifact: &Path,
    keep: &[PathBuf],
) -> Result<bool> {
    store.transaction(|tx| {
        let Some(record) = select_compensation(tx, artifact)? else {
            warn!(artifact = ?artifact, "rollback requested but no compensation record");
            return Ok(false);
        };
        apply(tx, fs, &record, keep)?;
        info!(artifact = ?artifact, "rolled back failed claim");
        Ok(true)
    })
}

/// Resolve every orphaned claim.
///
/// Guard files are deleted when present (absence is fine), the unit goes
/// back to Pending and its record is dropped. Running it twice is the same
/// as running it once.
pub fn reconcile(store: &Store, fs: &dyn FileSystem) -> Result<ReconcileReport> {
    let resolved = store.transaction(|tx| {
        let records = select_compensations(tx)?;
        let mut resolved = Vec::with_capacity(records.len());
        for record in records.iter() {
            resolved.push(apply(tx, fs, record, &[])?);
        }
        Ok(resolved)
    })?;

    if resolved.is_empty() {
        debug!("reconciliation found nothing to do");
    } else {
        info!(resolved = resolved.len(), "reconciliation complete");
    }
    Ok(ReconcileReport { resolved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::sched::claim::{claim, commit};
    use crate::store::WorkUnit;
    use crate::types::UnitKind;

    fn claimed_store(guards: &[&str]) -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .register_units(&[WorkUnit::new("map", "l1.bam", "S", UnitKind::Leaf)])
            .unwrap();
        let guards: Vec<PathBuf> = guards.iter().map(PathBuf::from).collect();
        claim(&store, Path::new("l1.bam"), &guards, false).unwrap();
        store
    }

    fn status(store: &Store) -> UnitStatus {
        store.get_unit(Path::new("l1.bam")).unwrap().unwrap().status
    }

    #[test]
    fn reconcile_removes_partial_output_and_resets() {
        let store = claimed_store(&["out.partial"]);
        let fs = MockFileSystem::new();
        fs.add_file("out.partial", "half");

        let report = reconcile(&store, &fs).unwrap();

        assert!(!fs.exists(Path::new("out.partial")));
        assert_eq!(status(&store), UnitStatus::Pending);
        assert!(store.compensations().unwrap().is_empty());
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].status_before, Some(UnitStatus::Claimed));
        assert_eq!(
            report.resolved[0].removed_guards,
            vec![PathBuf::from("out.partial")]
        );
    }

    #[test]
    fn reconcile_twice_is_reconcile_once() {
        let store = claimed_store(&["out.partial"]);
        let fs = MockFileSystem::new();
        fs.add_file("out.partial", "half");

        reconcile(&store, &fs).unwrap();
        let after_once = store.dump().unwrap();
        let second = reconcile(&store, &fs).unwrap();

        assert!(second.is_empty());
        assert_eq!(store.dump().unwrap(), after_once);
        assert!(fs.paths().is_empty());
    }

    #[test]
    fn committed_units_are_not_touched() {
        let store = claimed_store(&[]);
        commit(&store, Path::new("l1.bam")).unwrap();
        let fs = MockFileSystem::new();
        fs.add_file("l1.bam", "done");

        assert!(reconcile(&store, &fs).unwrap().is_empty());
        assert_eq!(status(&store), UnitStatus::Done);
        assert!(fs.exists(Path::new("l1.bam")));
    }

    #[test]
    fn rollback_single_claim() {
        let store = claimed_store(&["l1.log"]);
        let fs = MockFileSystem::new();
        fs.add_file("l1.bam", "partial");
        fs.add_file("l1.log", "log");

        assert!(rollback(&store, &fs, Path::new("l1.bam"), &[]).unwrap());
        assert_eq!(status(&store), UnitStatus::Pending);
        assert!(fs.paths().is_empty());
        assert!(!rollback(&store, &fs, Path::new("l1.bam"), &[]).unwrap());
    }

    #[test]
    fn rollback_leaves_kept_guards_in_place() {
        let store = claimed_store(&["l1.bam.err"]);
        let fs = MockFileSystem::new();
        fs.add_file("l1.bam", "partial");
        fs.add_file("l1.bam.err", "segfault");

        let keep = [PathBuf::from("l1.bam.err")];
        assert!(rollback(&store, &fs, Path::new("l1.bam"), &keep).unwrap());

        assert_eq!(fs.paths(), vec![PathBuf::from("l1.bam.err")]);
        assert_eq!(status(&store), UnitStatus::Pending);

        // A later crash pass has nothing left to do for this unit.
        assert!(reconcile(&store, &fs).unwrap().is_empty());
    }
}

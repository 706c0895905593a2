// src/sched/claim.rs

//! Work-unit lifecycle transitions.
//!
//! `Pending -> Claimed -> Done`, plus `Retired` for leaves consumed by a
//! merge. Every transition runs inside an exclusive store transaction.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::{Result, StagehandError};
use crate::fs::FileSystem;
use crate::store::{
    self, CompensationRecord, Store, WorkUnit, delete_compensation, insert_compensation,
    select_unit, update_status,
};
use crate::types::UnitStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller now owns the unit; its compensation record is in place.
    Claimed(WorkUnit),
    /// Another runner got there first, or the unit is no longer Pending.
    Lost {
        artifact: PathBuf,
        observed: UnitStatus,
    },
}

impl ClaimOutcome {
    pub fn claimed(self) -> Option<WorkUnit> {
        match self {
            ClaimOutcome::Claimed(unit) => Some(unit),
            ClaimOutcome::Lost { .. } => None,
        }
    }
}

/// Atomically reserve `artifact`.
///
/// Re-checks `Pending` under the exclusive lock (skipped when
/// `ignore_store`), moves the unit to `Claimed` and registers a
/// compensation record whose guard files are `guard_files` plus the
/// artifact itself, all in one transaction.
pub fn claim(
    store: &Store,
    artifact: &Path,
    guard_files: &[PathBuf],
    ignore_store: bool,
) -> Result<ClaimOutcome> {
    store.transaction(|tx| {
        let mut unit = select_unit(tx, artifact)?
            .ok_or_else(|| StagehandError::UnknownUnit(store::path_key(artifact)))?;

        if !ignore_store && unit.status != UnitStatus::Pending {
            debug!(artifact = %unit.key(), status = %unit.status, "claim lost");
            return Ok(ClaimOutcome::Lost {
                artifact: unit.artifact_path,
                observed: unit.status,
            });
        }

        update_status(tx, artifact, UnitStatus::Claimed)?;

        let mut guards = vec![unit.artifact_path.clone()];
        guards.extend(guard_files.iter().filter(|g| **g != unit.artifact_path).cloned());
        insert_compensation(
            tx,
            &CompensationRecord::reset_to_pending(unit.artifact_path.clone(), guards),
        )?;

        unit.status = UnitStatus::Claimed;
        debug!(artifact = %unit.key(), stage = %unit.stage, "claimed");
        Ok(ClaimOutcome::Claimed(unit))
    })
}

/// Mark a claimed unit Done and drop its compensation record.
pub fn commit(store: &Store, artifact: &Path) -> Result<()> {
    store.transaction(|tx| {
        let unit = select_unit(tx, artifact)?
            .ok_or_else(|| StagehandError::UnknownUnit(store::path_key(artifact)))?;
        if unit.status != UnitStatus::Claimed {
            return Err(StagehandError::InvalidTransition {
                artifact: unit.key(),
                from: unit.status,
                to: UnitStatus::Done,
            });
        }
        update_status(tx, artifact, UnitStatus::Done)?;
        delete_compensation(tx, artifact)?;
        info!(artifact = %unit.key(), stage = %unit.stage, "committed");
        Ok(())
    })
}

/// Complete a claimed merge and retire the leaves it consumed.
///
/// The merge becomes Done and loses its compensation record; each leaf
/// moves to Retired. Leaf files are removed afterwards when `delete_files`
/// is set. Returns the retired artifacts.
pub fn retire(
    store: &Store,
    fs: &dyn FileSystem,
    merge: &Path,
    leaves: &[PathBuf],
    delete_files: bool,
) -> Result<Vec<PathBuf>> {
    let retired = store.transaction(|tx| {
        let unit = select_unit(tx, merge)?
            .ok_or_else(|| StagehandError::UnknownUnit(store::path_key(merge)))?;
        if unit.status != UnitStatus::Claimed {
            return Err(StagehandError::InvalidTransition {
                artifact: unit.key(),
                from: unit.status,
                to: UnitStatus::Done,
            });
        }

        let mut retired = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let row = select_unit(tx, leaf)?
                .ok_or_else(|| StagehandError::UnknownUnit(store::path_key(leaf)))?;
            if row.status == UnitStatus::Retired {
                continue;
            }
            if !row.status.can_transition_to(UnitStatus::Retired) {
                return Err(StagehandError::InvalidTransition {
                    artifact: row.key(),
                    from: row.status,
                    to: UnitStatus::Retired,
                });
            }
            update_status(tx, leaf, UnitStatus::Retired)?;
            retired.push(row.artifact_path);
        }

        update_status(tx, merge, UnitStatus::Done)?;
        delete_compensation(tx, merge)?;
        info!(
            artifact = %unit.key(),
            retired = retired.len(),
            "merge committed, leaves retired"
        );
        Ok(retired)
    })?;

    if delete_files {
        for path in retired.iter() {
            match fs.remove_file(path) {
                Ok(true) => debug!(path = ?path, "removed consumed leaf"),
                Ok(false) => {}
                Err(e) => warn!(path = ?path, error = %e, "could not remove consumed leaf"),
            }
        }
    }

    Ok(retired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::types::UnitKind;

    fn store_with(units: &[(&str, UnitKind)]) -> Store {
        let store = Store::open_in_memory().unwrap();
        let rows: Vec<WorkUnit> = units
            .iter()
            .map(|(p, k)| WorkUnit::new("map", *p, "S", *k))
            .collect();
        store.register_units(&rows).unwrap();
        store
    }

    fn status(store: &Store, path: &str) -> UnitStatus {
        store.get_unit(Path::new(path)).unwrap().unwrap().status
    }

    #[test]
    fn claim_then_commit() {
        let store = store_with(&[("l1.bam", UnitKind::Leaf)]);
        let outcome = claim(&store, Path::new("l1.bam"), &[PathBuf::from("l1.log")], false).unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed(ref u) if u.status == UnitStatus::Claimed));

        let records = store.compensations().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].guard_files,
            vec![PathBuf::from("l1.bam"), PathBuf::from("l1.log")]
        );

        commit(&store, Path::new("l1.bam")).unwrap();
        assert_eq!(status(&store, "l1.bam"), UnitStatus::Done);
        assert!(store.compensations().unwrap().is_empty());
    }

    #[test]
    fn second_claim_is_lost_not_an_error() {
        let store = store_with(&[("l1.bam", UnitKind::Leaf)]);
        claim(&store, Path::new("l1.bam"), &[], false).unwrap();
        let again = claim(&store, Path::new("l1.bam"), &[], false).unwrap();
        assert_eq!(
            again,
            ClaimOutcome::Lost {
                artifact: PathBuf::from("l1.bam"),
                observed: UnitStatus::Claimed,
            }
        );
    }

    #[test]
    fn ignore_store_claims_done_units() {
        let store = store_with(&[("l1.bam", UnitKind::Leaf)]);
        claim(&store, Path::new("l1.bam"), &[], false).unwrap();
        commit(&store, Path::new("l1.bam")).unwrap();

        let outcome = claim(&store, Path::new("l1.bam"), &[], true).unwrap();
        assert!(outcome.claimed().is_some());
    }

    #[test]
    fn commit_requires_claim() {
        let store = store_with(&[("l1.bam", UnitKind::Leaf)]);
        let err = commit(&store, Path::new("l1.bam")).unwrap_err();
        assert!(matches!(
            err,
            StagehandError::InvalidTransition {
                from: UnitStatus::Pending,
                to: UnitStatus::Done,
                ..
            }
        ));
    }

    #[test]
    fn unknown_unit_is_an_error() {
        let store = store_with(&[]);
        assert!(matches!(
            claim(&store, Path::new("nope"), &[], false),
            Err(StagehandError::UnknownUnit(_))
        ));
    }

    #[test]
    fn retire_consumes_leaves() {
        let store = store_with(&[
            ("l1.bam", UnitKind::Leaf),
            ("l2.bam", UnitKind::Leaf),
            ("s.bam", UnitKind::Merge),
        ]);
        for leaf in ["l1.bam", "l2.bam"] {
            claim(&store, Path::new(leaf), &[], false).unwrap();
            commit(&store, Path::new(leaf)).unwrap();
        }
        claim(&store, Path::new("s.bam"), &[], false).unwrap();

        let fs = MockFileSystem::new();
        fs.add_file("l1.bam", "x");
        fs.add_file("l2.bam", "y");

        let leaves = vec![PathBuf::from("l1.bam"), PathBuf::from("l2.bam")];
        let retired = retire(&store, &fs, Path::new("s.bam"), &leaves, true).unwrap();

        assert_eq!(retired, leaves);
        assert_eq!(status(&store, "s.bam"), UnitStatus::Done);
        assert_eq!(status(&store, "l1.bam"), UnitStatus::Retired);
        assert!(fs.paths().is_empty());
    }

    #[test]
    fn retire_refuses_claimed_leaf() {
        let store = store_with(&[("l1.bam", UnitKind::Leaf), ("s.bam", UnitKind::Merge)]);
        claim(&store, Path::new("l1.bam"), &[], false).unwrap();
        claim(&store, Path::new("s.bam"), &[], false).unwrap();

        let fs = MockFileSystem::new();
        let err = retire(&store, &fs, Path::new("s.bam"), &[PathBuf::from("l1.bam")], false)
            .unwrap_err();
        assert!(matches!(err, StagehandError::InvalidTransition { .. }));
        // Rolled back: the merge is still claimed.
        assert_eq!(status(&store, "s.bam"), UnitStatus::Claimed);
    }
}

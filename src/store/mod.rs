// src/store/mod.rs

//! Durable unit/compensation store backed by SQLite.
//!
//! Cross-process mutual exclusion is the database's exclusive lock: every
//! claim, commit, retire and reconciliation runs inside
//! [`Store::transaction`], which opens a `BEGIN EXCLUSIVE` transaction.
//! Plain reads auto-commit.

mod rows;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::errors::{Result, StagehandError};
use crate::sched::filter::UnitFilter;
use crate::types::UnitStatus;

pub use rows::{CompensationRecord, RESET_TO_PENDING, WorkUnit};
pub(crate) use rows::{
    delete_compensation, insert_compensation, path_key, select_compensation,
    select_compensations, select_stage, select_unit, update_status,
};

/// Where a store's rows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOrigin {
    File(PathBuf),
    Memory,
    /// Private copy taken for a planning session; never flushed back.
    Snapshot,
}

#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
    origin: StoreOrigin,
}

impl Store {
    /// Open (creating if needed) the shared store at `path`.
    pub fn open(path: &Path, lock_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(lock_timeout)?;
        debug!(path = ?path, timeout_ms = lock_timeout.as_millis() as u64, "opened store");
        Self::from_connection(conn, StoreOrigin::File(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, StoreOrigin::Memory)
    }

    fn from_connection(conn: Connection, origin: StoreOrigin) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            origin,
        })
    }

    pub fn origin(&self) -> &StoreOrigin {
        &self.origin
    }

    pub fn is_snapshot(&self) -> bool {
        self.origin == StoreOrigin::Snapshot
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StagehandError::LockPoisoned)
    }

    /// Run `f` inside an exclusive transaction.
    ///
    /// Commits when `f` returns `Ok`. On `Err` (or a panic in `f`) the
    /// transaction is dropped, which rolls it back, and the connection
    /// mutex is released with the guard.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Units of `stage` accepted by `filter`, ordered by group then artifact.
    pub fn list_units(&self, stage: &str, filter: &UnitFilter) -> Result<Vec<WorkUnit>> {
        let conn = self.conn()?;
        let units = select_stage(&conn, stage)?;
        Ok(units.into_iter().filter(|u| filter.matches(u)).collect())
    }

    pub fn stage_units(&self, stage: &str) -> Result<Vec<WorkUnit>> {
        let conn = self.conn()?;
        select_stage(&conn, stage)
    }

    pub fn get_unit(&self, artifact: &Path) -> Result<Option<WorkUnit>> {
        let conn = self.conn()?;
        select_unit(&conn, artifact)
    }

    /// Insert units that are not yet known. Existing rows keep their status
    /// and group. Returns how many rows were added.
    pub fn register_units(&self, units: &[WorkUnit]) -> Result<usize> {
        self.transaction(|tx| {
            let mut added = 0;
            for unit in units {
                if rows::insert_unit(tx, unit)? {
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    /// Sync an index-stage unit with the presence of its artifact on disk.
    ///
    /// A present artifact marks a Pending unit Done; a vanished one resets a
    /// Done unit to Pending. Claimed and Retired rows are left alone.
    pub fn upsert_index(&self, unit: &WorkUnit, present: bool) -> Result<UnitStatus> {
        self.transaction(|tx| {
            let Some(existing) = select_unit(tx, &unit.artifact_path)? else {
                let mut fresh = unit.clone();
                fresh.status = if present {
                    UnitStatus::Done
                } else {
                    UnitStatus::Pending
                };
                rows::insert_unit(tx, &fresh)?;
                return Ok(fresh.status);
            };

            let next = match (existing.status, present) {
                (UnitStatus::Pending, true) => UnitStatus::Done,
                (UnitStatus::Done, false) => UnitStatus::Pending,
                (status, _) => status,
            };
            if next != existing.status {
                update_status(tx, &unit.artifact_path, next)?;
                debug!(
                    artifact = %unit.key(),
                    from = %existing.status,
                    to = %next,
                    "index unit synced with disk"
                );
            }
            Ok(next)
        })
    }

    pub fn compensations(&self) -> Result<Vec<CompensationRecord>> {
        let conn = self.conn()?;
        select_compensations(&conn)
    }

    /// Full row set ordered by artifact path.
    pub fn dump(&self) -> Result<Vec<WorkUnit>> {
        let conn = self.conn()?;
        rows::select_all(&conn)
    }

    /// Copy every row into a private in-memory store.
    pub fn snapshot(&self) -> Result<Store> {
        let src = self.conn()?;
        let mut dst = Connection::open_in_memory()?;
        {
            let backup = Backup::new(&src, &mut dst)?;
            backup.run_to_completion(256, Duration::ZERO, None)?;
        }
        drop(src);
        info!(origin = ?self.origin, "took planning snapshot");
        Self::from_connection(dst, StoreOrigin::Snapshot)
    }

    /// Forget all progress: every unit Pending, no compensations.
    ///
    /// Only permitted on a snapshot, for from-scratch planning.
    pub fn reset_all(&self) -> Result<()> {
        if !self.is_snapshot() {
            return Err(StagehandError::ConfigError(
                "refusing to reset a durable store; only planning snapshots can be reset"
                    .to_string(),
            ));
        }
        self.transaction(|tx| {
            tx.execute("UPDATE units SET status = 0", [])?;
            tx.execute("DELETE FROM compensations", [])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitKind;

    fn leaf(path: &str, group: &str) -> WorkUnit {
        WorkUnit::new("map", path, group, UnitKind::Leaf)
    }

    #[test]
    fn register_is_insert_if_absent() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.register_units(&[leaf("a.bam", "s1")]).unwrap(), 1);

        store
            .transaction(|tx| update_status(tx, Path::new("a.bam"), UnitStatus::Done))
            .unwrap();

        let added = store
            .register_units(&[leaf("a.bam", "s1"), leaf("b.bam", "s1")])
            .unwrap();
        assert_eq!(added, 1);
        let a = store.get_unit(Path::new("a.bam")).unwrap().unwrap();
        assert_eq!(a.status, UnitStatus::Done);
    }

    #[test]
    fn payload_survives_the_row() {
        let store = Store::open_in_memory().unwrap();
        let unit = WorkUnit::new("call", "c/s1_0.bcf", "s1", UnitKind::Pool)
            .with_payload("pool", "0")
            .with_payload("members", "chr1,chr2");
        store.register_units(&[unit.clone()]).unwrap();

        let back = store.get_unit(Path::new("c/s1_0.bcf")).unwrap().unwrap();
        assert_eq!(back, unit);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        store.register_units(&[leaf("a.bam", "s1")]).unwrap();

        let res: Result<()> = store.transaction(|tx| {
            update_status(tx, Path::new("a.bam"), UnitStatus::Claimed)?;
            Err(StagehandError::UnknownUnit("boom".into()))
        });
        assert!(res.is_err());

        let a = store.get_unit(Path::new("a.bam")).unwrap().unwrap();
        assert_eq!(a.status, UnitStatus::Pending);
    }

    #[test]
    fn upsert_index_follows_disk() {
        let store = Store::open_in_memory().unwrap();
        let idx = WorkUnit::new("index", "ref.gem", "reference", UnitKind::Index);

        assert_eq!(store.upsert_index(&idx, false).unwrap(), UnitStatus::Pending);
        assert_eq!(store.upsert_index(&idx, true).unwrap(), UnitStatus::Done);
        assert_eq!(store.upsert_index(&idx, true).unwrap(), UnitStatus::Done);
        assert_eq!(store.upsert_index(&idx, false).unwrap(), UnitStatus::Pending);
    }

    #[test]
    fn snapshot_is_independent() {
        let store = Store::open_in_memory().unwrap();
        store.register_units(&[leaf("a.bam", "s1")]).unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(store.origin(), &StoreOrigin::Memory);
        assert!(snap.is_snapshot());
        assert_eq!(snap.dump().unwrap(), store.dump().unwrap());

        snap.transaction(|tx| update_status(tx, Path::new("a.bam"), UnitStatus::Done))
            .unwrap();
        let original = store.get_unit(Path::new("a.bam")).unwrap().unwrap();
        assert_eq!(original.status, UnitStatus::Pending);
    }

    #[test]
    fn reset_all_refuses_durable_store() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.reset_all().is_err());
        assert!(store.snapshot().unwrap().reset_all().is_ok());
    }
}

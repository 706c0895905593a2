// src/store/rows.rs

//! Row types and the statements that read and write them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::errors::Result;
use crate::types::{GroupKey, StageName, UnitKind, UnitStatus};

/// One schedulable piece of pipeline work with a durable status.
///
/// `artifact_path` is both the primary key and the output location.
/// Stage-specific data (pool id, pool members, ...) lives in `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkUnit {
    pub artifact_path: PathBuf,
    pub stage: StageName,
    pub group_key: GroupKey,
    pub kind: UnitKind,
    pub status: UnitStatus,
    pub payload: BTreeMap<String, String>,
}

impl WorkUnit {
    pub fn new(
        stage: impl Into<StageName>,
        artifact_path: impl Into<PathBuf>,
        group_key: impl Into<GroupKey>,
        kind: UnitKind,
    ) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            stage: stage.into(),
            group_key: group_key.into(),
            kind,
            status: UnitStatus::Pending,
            payload: BTreeMap::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Display key used in logs, reports and manifest descriptions.
    pub fn key(&self) -> String {
        path_key(&self.artifact_path)
    }
}

/// A registered undo action for one claimed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompensationRecord {
    pub artifact_path: PathBuf,
    /// Statement restoring the unit to Pending; `?1` binds the artifact path.
    pub undo_statement: String,
    /// Files whose presence indicates partial completion.
    pub guard_files: Vec<PathBuf>,
}

pub const RESET_TO_PENDING: &str = "UPDATE units SET status = 0 WHERE artifact_path = ?1";

impl CompensationRecord {
    pub fn reset_to_pending(artifact_path: impl Into<PathBuf>, guard_files: Vec<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            undo_statement: RESET_TO_PENDING.to_string(),
            guard_files,
        }
    }
}

pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

const UNIT_COLUMNS: &str = "artifact_path, stage, group_key, unit_kind, status, payload";

fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<WorkUnit> {
    let artifact: String = row.get(0)?;
    let kind_text: String = row.get(3)?;
    let code: i64 = row.get(4)?;
    let payload_text: String = row.get(5)?;

    let kind = kind_text
        .parse::<UnitKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    let status = UnitStatus::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Integer,
            format!("unknown unit status code {code}").into(),
        )
    })?;
    let payload = serde_json::from_str(&payload_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(WorkUnit {
        artifact_path: PathBuf::from(artifact),
        stage: row.get(1)?,
        group_key: row.get(2)?,
        kind,
        status,
        payload,
    })
}

pub(crate) fn select_unit(conn: &Connection, artifact: &Path) -> Result<Option<WorkUnit>> {
    let sql = format!("SELECT {UNIT_COLUMNS} FROM units WHERE artifact_path = ?1");
    Ok(conn
        .query_row(&sql, [path_key(artifact)], unit_from_row)
        .optional()?)
}

pub(crate) fn select_stage(conn: &Connection, stage: &str) -> Result<Vec<WorkUnit>> {
    let sql = format!(
        "SELECT {UNIT_COLUMNS} FROM units WHERE stage = ?1 ORDER BY group_key, artifact_path"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([stage], unit_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn select_all(conn: &Connection) -> Result<Vec<WorkUnit>> {
    let sql = format!("SELECT {UNIT_COLUMNS} FROM units ORDER BY artifact_path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], unit_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert a unit unless its artifact is already known. Returns whether a row
/// was inserted; an existing row keeps its status.
pub(crate) fn insert_unit(conn: &Connection, unit: &WorkUnit) -> Result<bool> {
    let payload = serde_json::to_string(&unit.payload)?;
    let changes = conn.execute(
        "INSERT OR IGNORE INTO units (artifact_path, stage, group_key, unit_kind, status, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            unit.key(),
            unit.stage,
            unit.group_key,
            unit.kind.as_str(),
            unit.status.code(),
            payload,
        ],
    )?;
    Ok(changes > 0)
}

pub(crate) fn update_status(conn: &Connection, artifact: &Path, to: UnitStatus) -> Result<bool> {
    let changes = conn.execute(
        "UPDATE units SET status = ?2 WHERE artifact_path = ?1",
        params![path_key(artifact), to.code()],
    )?;
    Ok(changes > 0)
}

pub(crate) fn insert_compensation(conn: &Connection, record: &CompensationRecord) -> Result<()> {
    let guards: Vec<String> = record.guard_files.iter().map(|p| path_key(p)).collect();
    conn.execute(
        "INSERT OR REPLACE INTO compensations (artifact_path, undo_statement, guard_files)
         VALUES (?1, ?2, ?3)",
        params![
            path_key(&record.artifact_path),
            record.undo_statement,
            serde_json::to_string(&guards)?,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_compensation(conn: &Connection, artifact: &Path) -> Result<bool> {
    let changes = conn.execute(
        "DELETE FROM compensations WHERE artifact_path = ?1",
        [path_key(artifact)],
    )?;
    Ok(changes > 0)
}

fn compensation_from_row(row: &Row<'_>) -> rusqlite::Result<CompensationRecord> {
    let artifact: String = row.get(0)?;
    let guards_text: String = row.get(2)?;
    let guards: Vec<String> = serde_json::from_str(&guards_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(CompensationRecord {
        artifact_path: PathBuf::from(artifact),
        undo_statement: row.get(1)?,
        guard_files: guards.into_iter().map(PathBuf::from).collect(),
    })
}

pub(crate) fn select_compensation(
    conn: &Connection,
    artifact: &Path,
) -> Result<Option<CompensationRecord>> {
    Ok(conn
        .query_row(
            "SELECT artifact_path, undo_statement, guard_files FROM compensations
             WHERE artifact_path = ?1",
            [path_key(artifact)],
            compensation_from_row,
        )
        .optional()?)
}

pub(crate) fn select_compensations(conn: &Connection) -> Result<Vec<CompensationRecord>> {
    let mut stmt = conn.prepare(
        "SELECT artifact_path, undo_statement, guard_files FROM compensations
         ORDER BY artifact_path",
    )?;
    let rows = stmt.query_map([], compensation_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// src/store/schema.rs

use rusqlite::Connection;
use tracing::debug;

use crate::errors::{Result, StagehandError};

pub const SCHEMA_VERSION: i64 = 1;

/// One row per work unit across all stages, plus pending compensations.
const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS units (
    artifact_path TEXT PRIMARY KEY,
    stage         TEXT NOT NULL,
    group_key     TEXT NOT NULL,
    unit_kind     TEXT NOT NULL,
    status        INTEGER NOT NULL DEFAULT 0 CHECK (status IN (0, 1, 2, 3)),
    payload       TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS units_stage_group ON units (stage, group_key);

CREATE TABLE IF NOT EXISTS compensations (
    artifact_path  TEXT PRIMARY KEY,
    undo_statement TEXT NOT NULL,
    guard_files    TEXT NOT NULL DEFAULT '[]'
);
";

pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StagehandError::ConfigError(format!(
            "store schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.execute_batch("PRAGMA user_version = 1")?;
        debug!(version = 1, "store schema created");
    }

    Ok(())
}

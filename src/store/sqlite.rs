use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{ffi, params, Connection, DatabaseName, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};

use super::{normalize_lookup, LogStore, StoreError};
use crate::domain::{
    now_utc_rfc3339, ExerciseEntry, LogId, LogKey, LogPatch, NewLogRecord, PersistedLogRecord,
};

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "baseline_workout_log_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workout_log (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    program_id TEXT NOT NULL,
    week_index INTEGER NOT NULL,
    day_index INTEGER NOT NULL,
    name TEXT NOT NULL,
    is_finished INTEGER NOT NULL DEFAULT 0,
    is_draft INTEGER NOT NULL DEFAULT 1,
    exercises_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_workout_log_key
    ON workout_log(account_id, program_id, week_index, day_index);
CREATE INDEX IF NOT EXISTS idx_workout_log_updated_at ON workout_log(updated_at);
"#,
    },
    Migration {
        version: 2,
        name: "workout_log_completed_at_v1",
        sql: r#"
ALTER TABLE workout_log ADD COLUMN completed_at TEXT;

UPDATE workout_log
SET completed_at = updated_at
WHERE is_finished = 1 AND completed_at IS NULL;
"#,
    },
];

const SELECT_COLUMNS: &str = r#"
SELECT id, account_id, program_id, week_index, day_index, name,
       is_finished, is_draft, exercises_json, updated_at, completed_at
FROM workout_log
"#;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Upper bound for a single store call; lock waits beyond it fail as
    /// [`StoreError::Timeout`].
    pub call_timeout: Duration,
    /// When set, every call for another account fails with
    /// [`StoreError::PermissionDenied`].
    pub account_scope: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(5000),
            account_scope: None,
        }
    }
}

/// SQLite-backed [`LogStore`]. Each instance owns one connection; separate
/// instances on one file behave like separate sessions against a shared store.
pub struct SqliteLogStore {
    conn: Mutex<Connection>,
    options: StoreOptions,
}

impl SqliteLogStore {
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            }
        }
        let mut conn = Connection::open(path).map_err(map_sqlite_error)?;
        configure_connection(&conn, options.call_timeout).map_err(map_sqlite_error)?;
        apply_migrations(&mut conn).map_err(map_sqlite_error)?;
        debug!(path = %path.display(), "opened workout log store");
        Ok(Self {
            conn: Mutex::new(conn),
            options,
        })
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let raw: String = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        raw.parse()
            .map_err(|_| StoreError::Malformed(format!("schema version '{raw}' is not a number")))
    }

    pub fn count_for_key(&self, key: &LogKey) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT COUNT(*) FROM workout_log
WHERE account_id = ?1 AND program_id = ?2 AND week_index = ?3 AND day_index = ?4
"#,
            params![key.account_id, key.program_id, key.week_index, key.day_index],
            |row| row.get(0),
        )
        .map_err(map_sqlite_error)
    }

    fn check_scope(&self, account_id: &str) -> Result<(), StoreError> {
        match self.options.account_scope.as_deref() {
            Some(scope) if scope != account_id => Err(StoreError::PermissionDenied(format!(
                "account '{}' is outside the session scope",
                account_id
            ))),
            _ => Ok(()),
        }
    }
}

fn configure_connection(conn: &Connection, call_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.busy_timeout(call_timeout)?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
        info!(version = migration.version, name = migration.name, "applied schema migration");
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

/// Row shape before the exercises column is decoded.
struct RawRow {
    record: PersistedLogRecord,
    exercises_json: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        record: PersistedLogRecord {
            id: LogId::new(row.get::<_, String>(0)?),
            key: LogKey {
                account_id: row.get(1)?,
                program_id: row.get(2)?,
                week_index: row.get(3)?,
                day_index: row.get(4)?,
            },
            name: row.get(5)?,
            is_finished: row.get(6)?,
            is_draft: row.get(7)?,
            exercises: Vec::new(),
            updated_at: row.get(9)?,
            completed_at: row.get(10)?,
        },
        exercises_json: row.get(8)?,
    })
}

fn decode_row(raw: RawRow) -> Result<PersistedLogRecord, StoreError> {
    let mut record = raw.record;
    record.exercises = serde_json::from_str::<Vec<ExerciseEntry>>(&raw.exercises_json)
        .map_err(|err| {
            StoreError::Malformed(format!("exercises of log '{}': {}", record.id, err))
        })?;
    Ok(record)
}

fn encode_exercises(exercises: &[ExerciseEntry]) -> Result<String, StoreError> {
    serde_json::to_string(exercises).map_err(|err| StoreError::Malformed(err.to_string()))
}

fn select_by_id(conn: &Connection, id: &LogId) -> Result<Option<PersistedLogRecord>, StoreError> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    conn.query_row(&sql, params![id.as_str()], read_row)
        .optional()
        .map_err(map_sqlite_error)?
        .map(decode_row)
        .transpose()
}

impl LogStore for SqliteLogStore {
    fn find_by_key(&self, key: &LogKey) -> Result<Option<PersistedLogRecord>, StoreError> {
        self.check_scope(&key.account_id)?;
        let conn = self.conn.lock();
        let sql = format!(
            "{SELECT_COLUMNS} WHERE account_id = ?1 AND program_id = ?2 AND week_index = ?3 AND day_index = ?4"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
        let mut rows = stmt
            .query(params![
                key.account_id,
                key.program_id,
                key.week_index,
                key.day_index
            ])
            .map_err(map_sqlite_error)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            result.push(decode_row(read_row(row).map_err(map_sqlite_error)?)?);
        }
        Ok(normalize_lookup(key, result))
    }

    fn create_log(&self, record: &NewLogRecord) -> Result<PersistedLogRecord, StoreError> {
        self.check_scope(&record.key.account_id)?;
        let id = LogId::generate();
        let now = now_utc_rfc3339();
        let completed_at = record.is_finished.then(|| now.clone());
        let exercises_json = encode_exercises(&record.exercises)?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO workout_log (
    id, account_id, program_id, week_index, day_index, name,
    is_finished, is_draft, exercises_json, created_at, updated_at, completed_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11)
"#,
            params![
                id.as_str(),
                record.key.account_id,
                record.key.program_id,
                record.key.week_index,
                record.key.day_index,
                record.name,
                record.is_finished,
                !record.is_finished,
                exercises_json,
                now,
                completed_at,
            ],
        )
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::UniqueConstraintViolation {
                    key: record.key.clone(),
                }
            } else {
                map_sqlite_error(err)
            }
        })?;

        Ok(PersistedLogRecord {
            id,
            key: record.key.clone(),
            name: record.name.clone(),
            is_finished: record.is_finished,
            is_draft: !record.is_finished,
            exercises: record.exercises.clone(),
            updated_at: now,
            completed_at,
        })
    }

    fn update_log(
        &self,
        id: &LogId,
        key: &LogKey,
        patch: &LogPatch,
    ) -> Result<PersistedLogRecord, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;

        let mut record = select_by_id(&tx, id)?
            .filter(|row| &row.key == key)
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
        self.check_scope(&record.key.account_id)?;

        patch.apply_to(&mut record, &now_utc_rfc3339());
        tx.execute(
            r#"
UPDATE workout_log
SET name = ?2,
    is_finished = ?3,
    is_draft = ?4,
    exercises_json = ?5,
    updated_at = ?6,
    completed_at = ?7
WHERE id = ?1
  AND account_id = ?8
  AND program_id = ?9
  AND week_index = ?10
  AND day_index = ?11
"#,
            params![
                id.as_str(),
                record.name,
                record.is_finished,
                record.is_draft,
                encode_exercises(&record.exercises)?,
                record.updated_at,
                record.completed_at,
                key.account_id,
                key.program_id,
                key.week_index,
                key.day_index,
            ],
        )
        .map_err(map_sqlite_error)?;
        tx.commit().map_err(map_sqlite_error)?;
        Ok(record)
    }

    fn exists_by_id_and_key(&self, id: &LogId, key: &LogKey) -> Result<bool, StoreError> {
        self.check_scope(&key.account_id)?;
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT EXISTS(
    SELECT 1 FROM workout_log
    WHERE id = ?1 AND account_id = ?2 AND program_id = ?3
      AND week_index = ?4 AND day_index = ?5
)
"#,
            params![
                id.as_str(),
                key.account_id,
                key.program_id,
                key.week_index,
                key.day_index
            ],
            |row| row.get(0),
        )
        .map_err(map_sqlite_error)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::ConstraintViolation
                && inner.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(inner, _) => match inner.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StoreError::Timeout(err.to_string())
            }
            ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::AuthorizationForStatementDenied => {
                StoreError::PermissionDenied(err.to_string())
            }
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::FileLockingProtocolFailed => StoreError::Unavailable(err.to_string()),
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase | ErrorCode::TypeMismatch => {
                StoreError::Malformed(err.to_string())
            }
            _ => StoreError::Other(err.to_string()),
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Malformed(err.to_string()),
        _ => StoreError::Other(err.to_string()),
    }
}

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{SqliteLogStore, StoreOptions, CURRENT_SCHEMA_VERSION};
use crate::domain::{ExerciseEntry, LogId, LogKey, LogPatch, NewLogRecord};
use crate::store::{LogStore, StoreError};

fn unique_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("liftlog-store-{}.sqlite", Uuid::now_v7()))
}

fn cleanup_db_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let candidate = format!("{}{suffix}", path.display());
        let _ = std::fs::remove_file(candidate);
    }
}

fn key(day: u32) -> LogKey {
    LogKey::new("u1", "p1", 0, day).expect("valid key")
}

fn bench_press() -> ExerciseEntry {
    ExerciseEntry {
        exercise_id: "bench".to_string(),
        sets: 2,
        reps: vec![8, 8],
        weights: vec![60.0, 62.5],
        completed: vec![true, false],
        notes: String::new(),
        bodyweight: None,
    }
}

#[test]
fn configures_connection_and_schema() {
    let path = unique_db_path();
    let store = SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open");
    assert_eq!(
        store.schema_version().expect("schema version should load"),
        CURRENT_SCHEMA_VERSION
    );
    drop(store);

    let conn = Connection::open(&path).expect("raw connection should open");
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("journal_mode pragma should be readable");
    assert_eq!(journal_mode.to_uppercase(), "WAL");
    let unique_index: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_workout_log_key'",
            [],
            |row| row.get(0),
        )
        .expect("index lookup should work");
    assert_eq!(unique_index, 1);

    cleanup_db_files(&path);
}

#[test]
fn reopening_applies_migrations_once() {
    let path = unique_db_path();
    drop(SqliteLogStore::open(&path, StoreOptions::default()).expect("first open"));
    drop(SqliteLogStore::open(&path, StoreOptions::default()).expect("second open"));

    let conn = Connection::open(&path).expect("raw connection should open");
    let applied: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
        .expect("migration count should be readable");
    assert_eq!(applied, CURRENT_SCHEMA_VERSION);

    cleanup_db_files(&path);
}

#[test]
fn completed_at_migration_backfills_finished_rows() {
    let path = unique_db_path();
    {
        let conn = Connection::open(&path).expect("raw connection should open");
        conn.execute_batch(super::MIGRATIONS[0].sql)
            .expect("baseline schema should apply");
        conn.execute_batch(
            r#"
CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, name TEXT NOT NULL, applied_at TEXT NOT NULL);
INSERT INTO schema_migrations VALUES (1, 'baseline_workout_log_v1', '2026-01-01T00:00:00Z');
"#,
        )
        .expect("migration ledger should be seeded");
        conn.execute(
            r#"
INSERT INTO workout_log (id, account_id, program_id, week_index, day_index, name,
    is_finished, is_draft, exercises_json, created_at, updated_at)
VALUES (?1, 'u1', 'p1', 0, ?2, 'legacy', ?3, ?4, '[]', '2025-05-01T00:00:00Z', '2025-05-02T00:00:00Z')
"#,
            params!["done-log", 0, true, false],
        )
        .expect("finished legacy row should insert");
        conn.execute(
            r#"
INSERT INTO workout_log (id, account_id, program_id, week_index, day_index, name,
    is_finished, is_draft, exercises_json, created_at, updated_at)
VALUES (?1, 'u1', 'p1', 0, ?2, 'legacy', ?3, ?4, '[]', '2025-05-01T00:00:00Z', '2025-05-02T00:00:00Z')
"#,
            params!["draft-log", 1, false, true],
        )
        .expect("draft legacy row should insert");
    }

    let store = SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open");
    let finished = store
        .find_by_key(&key(0))
        .expect("lookup should work")
        .expect("finished row should exist");
    assert_eq!(finished.completed_at.as_deref(), Some("2025-05-02T00:00:00Z"));
    let draft = store
        .find_by_key(&key(1))
        .expect("lookup should work")
        .expect("draft row should exist");
    assert_eq!(draft.completed_at, None);

    drop(store);
    cleanup_db_files(&path);
}

#[test]
fn create_then_find_update_and_validate() {
    let path = unique_db_path();
    let store = SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open");

    assert!(store.find_by_key(&key(0)).expect("lookup").is_none());
    let created = store
        .create_log(&NewLogRecord::for_key(key(0), vec![bench_press()], false))
        .expect("create should succeed");
    assert!(created.id.is_well_formed());
    assert!(created.is_draft);

    let found = store
        .find_by_key(&key(0))
        .expect("lookup")
        .expect("row should exist");
    assert_eq!(found, created);

    assert!(store
        .exists_by_id_and_key(&created.id, &key(0))
        .expect("exists should work"));
    assert!(!store
        .exists_by_id_and_key(&created.id, &key(1))
        .expect("exists should work"));

    let mut edited = bench_press();
    edited.completed = vec![true, true];
    let updated = store
        .update_log(&created.id, &key(0), &LogPatch::from_batch(vec![edited.clone()], true))
        .expect("update should succeed");
    assert_eq!(updated.exercises, vec![edited]);
    assert!(updated.is_finished);
    assert!(updated.completed_at.is_some());
    assert_eq!(updated.name, "Week 1 Day 1");

    drop(store);
    cleanup_db_files(&path);
}

#[test]
fn duplicate_create_reports_unique_violation() {
    let path = unique_db_path();
    let store = SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open");
    let record = NewLogRecord::for_key(key(0), vec![bench_press()], false);
    store.create_log(&record).expect("first create succeeds");

    let err = store
        .create_log(&record)
        .expect_err("second create must collide");
    assert_eq!(err, StoreError::UniqueConstraintViolation { key: key(0) });
    assert_eq!(store.count_for_key(&key(0)).expect("count"), 1);

    drop(store);
    cleanup_db_files(&path);
}

#[test]
fn update_of_missing_row_is_not_found() {
    let path = unique_db_path();
    let store = SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open");
    let err = store
        .update_log(&LogId::from("gone"), &key(0), &LogPatch::default())
        .expect_err("missing row should fail");
    assert_eq!(
        err,
        StoreError::NotFound {
            id: LogId::from("gone")
        }
    );

    drop(store);
    cleanup_db_files(&path);
}

#[test]
fn update_through_another_keys_id_is_not_found() {
    let path = unique_db_path();
    let store = SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open");
    let day_one = store
        .create_log(&NewLogRecord::for_key(key(1), vec![bench_press()], false))
        .expect("create should succeed");

    let mut edited = bench_press();
    edited.reps = vec![1, 1];
    let err = store
        .update_log(&day_one.id, &key(0), &LogPatch::from_batch(vec![edited], true))
        .expect_err("id belongs to another day");
    assert_eq!(
        err,
        StoreError::NotFound {
            id: day_one.id.clone()
        }
    );

    let untouched = store
        .find_by_key(&key(1))
        .expect("lookup")
        .expect("row should exist");
    assert_eq!(untouched, day_one);
    assert!(store.find_by_key(&key(0)).expect("lookup").is_none());

    drop(store);
    cleanup_db_files(&path);
}

#[test]
fn account_scope_denies_other_accounts() {
    let path = unique_db_path();
    let owner = SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open");
    let created = owner
        .create_log(&NewLogRecord::for_key(key(0), vec![bench_press()], false))
        .expect("create should succeed");

    let scoped = SqliteLogStore::open(
        &path,
        StoreOptions {
            account_scope: Some("someone-else".to_string()),
            ..StoreOptions::default()
        },
    )
    .expect("scoped store should open");
    assert!(matches!(
        scoped.find_by_key(&key(0)),
        Err(StoreError::PermissionDenied(_))
    ));
    assert!(matches!(
        scoped.update_log(&created.id, &key(0), &LogPatch::default()),
        Err(StoreError::PermissionDenied(_))
    ));

    drop(owner);
    drop(scoped);
    cleanup_db_files(&path);
}

#[test]
fn corrupt_exercise_json_is_malformed() {
    let path = unique_db_path();
    let store = Arc::new(
        SqliteLogStore::open(&path, StoreOptions::default()).expect("store should open"),
    );
    let created = store
        .create_log(&NewLogRecord::for_key(key(0), vec![bench_press()], false))
        .expect("create should succeed");
    {
        let conn = Connection::open(&path).expect("raw connection should open");
        conn.execute(
            "UPDATE workout_log SET exercises_json = '{not json' WHERE id = ?1",
            params![created.id.as_str()],
        )
        .expect("corruption should apply");
    }

    assert!(matches!(
        store.find_by_key(&key(0)),
        Err(StoreError::Malformed(_))
    ));

    drop(store);
    cleanup_db_files(&path);
}

use std::path::PathBuf;

use rusqlite::Connection;

use crate::adapters::db::{open_connection, run_migrations};

/// Scratch database path for one test. The tempdir is leaked so the file
/// outlives the helper.
pub fn temp_db_path(test_name: &str) -> PathBuf {
    let dir = tempfile::tempdir().expect("test db dir should be creatable");
    let path = dir.path().join(format!("{test_name}.sqlite"));
    std::mem::forget(dir);
    path
}

/// Open a fresh migrated database for one test.
pub fn open_test_connection(test_name: &str) -> Connection {
    let path = temp_db_path(test_name);
    let mut connection =
        open_connection(path.to_string_lossy().as_ref()).expect("test db should open");
    run_migrations(&mut connection).expect("test db migrations should succeed");
    connection
}

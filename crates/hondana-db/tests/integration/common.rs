use hondana_db::{Database, DatabaseConfig};
use tempfile::TempDir;

/// Opens a primary database in a fresh temporary directory.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// deletes the database file.
pub async fn setup_test_db() -> (Database, TempDir) {
    setup_test_db_with(|_| {}).await
}

/// Like [`setup_test_db`], with a chance to adjust the config first.
pub async fn setup_test_db_with(adjust: impl FnOnce(&mut DatabaseConfig)) -> (Database, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = DatabaseConfig::at(dir.path().join("db").join("cache.db"));
    config.primary = true;
    adjust(&mut config);

    let db = Database::open(&config)
        .await
        .expect("Failed to open test database");
    (db, dir)
}

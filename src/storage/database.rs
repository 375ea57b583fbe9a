//! SQLite handle ownership and schema upgrades

use super::schema::{Migration, SCHEMA_VERSION};
use crate::record::Collection;
use crate::{Error, Result};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables applied when a store is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// How long a statement waits on a locked database before failing
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging for on-disk stores
    pub wal: bool,
    /// Rows fetched per cursor page
    pub page_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal: true,
            page_size: 64,
        }
    }
}

/// The store's single database handle.
///
/// Construction brings the schema up to [`SCHEMA_VERSION`], so any
/// `Database` value is safe to query under the current table shapes.
pub struct Database {
    conn: Connection,
    options: StoreOptions,
}

impl Database {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: StoreOptions) -> Result<Self> {
        tracing::info!("Opening store {}", path.display());
        let unavailable = |source| Error::StorageUnavailable {
            path: path.display().to_string(),
            source,
        };

        let conn = Connection::open(path).map_err(unavailable)?;
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))
            .map_err(unavailable)?;
        if options.wal {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(unavailable)?;
            tracing::debug!("journal_mode = {}", mode);
        }
        // first read of the file header: not-a-database fails here
        conn.pragma_query_value(None, "user_version", |row| row.get::<_, i32>(0))
            .map_err(unavailable)?;

        Self::from_connection_with(conn, options)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::StorageUnavailable {
            path: ":memory:".to_string(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Take ownership of an existing connection and upgrade it
    pub fn from_connection(conn: Connection) -> Result<Self> {
        Self::from_connection_with(conn, StoreOptions::default())
    }

    pub fn from_connection_with(mut conn: Connection, options: StoreOptions) -> Result<Self> {
        upgrade(&mut conn)?;
        Ok(Self { conn, options })
    }

    /// Stored schema version
    pub fn version(&self) -> Result<i32> {
        read_version(&self.conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Count rows in a collection's table
    pub fn count_rows(&self, collection: Collection) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn read_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Run the upgrade path for the stored version in one immediate transaction.
///
/// Nothing is committed unless every statement and the version bump succeed.
fn upgrade(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let from = read_version(&tx)?;
    let migration = Migration::for_version(from)?;

    if migration == Migration::UpToDate {
        return Ok(());
    }

    if migration.is_destructive() {
        tracing::warn!(
            "Upgrading database from version {} to {} ({:?}); stored rows will be dropped",
            from,
            SCHEMA_VERSION,
            migration
        );
    } else {
        tracing::info!(
            "Upgrading database from version {} to {} ({:?})",
            from,
            SCHEMA_VERSION,
            migration
        );
    }

    for stmt in migration.statements() {
        tx.execute_batch(stmt)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Build a store at a legacy schema version (for upgrade tests)
#[cfg(test)]
fn legacy_connection(version: i32) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE uploads (_id INTEGER PRIMARY KEY, title TEXT, path TEXT, status TEXT, \
         sharing TEXT, description TEXT, genre TEXT, track_type TEXT);",
    )
    .unwrap();
    if version >= 11 {
        conn.execute_batch(
            "CREATE TABLE tracks (_id INTEGER PRIMARY KEY, title TEXT, track_id INTEGER, stream_url TEXT);",
        )
        .unwrap();
    } else {
        conn.execute_batch("CREATE TABLE tracks (_id INTEGER PRIMARY KEY, title TEXT, id INTEGER);")
            .unwrap();
    }
    conn.execute(
        "INSERT INTO uploads (title, path) VALUES ('old.mp3', '/sdcard/old.mp3')",
        [],
    )
    .unwrap();
    conn.execute("INSERT INTO tracks (title) VALUES ('cached')", []).unwrap();
    conn.pragma_update(None, "user_version", version).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(db: &Database, table: &str) -> Vec<String> {
        let mut stmt = db
            .connection()
            .prepare(&format!("SELECT name FROM pragma_table_info('{}')", table))
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_fresh_store_is_current() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.count_rows(Collection::Uploads).unwrap(), 0);
        assert_eq!(db.count_rows(Collection::Tracks).unwrap(), 0);
        assert!(columns(&db, "tracks").contains(&"duration".to_string()));
    }

    #[test]
    fn test_reopen_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let db = Database::open(&path).unwrap();
        db.connection()
            .execute("INSERT INTO uploads (title) VALUES ('keep')", [])
            .unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        assert_eq!(db.version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.count_rows(Collection::Uploads).unwrap(), 1);
    }

    #[test]
    fn test_upgrade_from_11_keeps_tracks() {
        let db = Database::from_connection(legacy_connection(11)).unwrap();
        assert_eq!(db.version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.count_rows(Collection::Tracks).unwrap(), 1);
        assert_eq!(db.count_rows(Collection::Uploads).unwrap(), 1);

        let duration: Option<i64> = db
            .connection()
            .query_row("SELECT duration FROM tracks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(duration, None);
    }

    #[test]
    fn test_upgrade_from_10_drops_tracks_only() {
        let db = Database::from_connection(legacy_connection(10)).unwrap();
        assert_eq!(db.count_rows(Collection::Tracks).unwrap(), 0);
        assert_eq!(db.count_rows(Collection::Uploads).unwrap(), 1);
        assert_eq!(
            columns(&db, "tracks"),
            vec!["_id", "title", "track_id", "stream_url", "duration"]
        );
    }

    #[test]
    fn test_upgrade_from_older_drops_everything() {
        for version in [1, 5, 9] {
            let db = Database::from_connection(legacy_connection(version)).unwrap();
            assert_eq!(db.version().unwrap(), SCHEMA_VERSION);
            assert_eq!(db.count_rows(Collection::Tracks).unwrap(), 0);
            assert_eq!(db.count_rows(Collection::Uploads).unwrap(), 0);
        }
    }

    #[test]
    fn test_upgraded_tables_never_reuse_ids() {
        for version in [10, 11] {
            let db = Database::from_connection(legacy_connection(version)).unwrap();
            let conn = db.connection();
            for table in ["uploads", "tracks"] {
                conn.execute(&format!("INSERT INTO {} (title) VALUES ('new')", table), [])
                    .unwrap();
                let top = conn.last_insert_rowid();
                conn.execute(&format!("DELETE FROM {} WHERE _id = ?", table), [top])
                    .unwrap();
                conn.execute(&format!("INSERT INTO {} (title) VALUES ('again')", table), [])
                    .unwrap();
                assert!(conn.last_insert_rowid() > top, "{table} at version {version}");
            }
        }
    }

    #[test]
    fn test_upgrade_keeps_legacy_ids() {
        let db = Database::from_connection(legacy_connection(11)).unwrap();
        let (id, path): (i64, String) = db
            .connection()
            .query_row("SELECT _id, path FROM uploads", [], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!((id, path.as_str()), (1, "/sdcard/old.mp3"));

        let leftovers: i64 = db
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%_legacy'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_newer_store_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        let err = Database::from_connection(conn).err().unwrap();
        assert!(matches!(err, Error::UnsupportedSchemaVersion { .. }));
    }

    #[test]
    fn test_failed_upgrade_rolls_back() {
        // version 11 without a tracks table: the ALTER fails
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE uploads (_id INTEGER PRIMARY KEY, title TEXT);")
            .unwrap();
        conn.pragma_update(None, "user_version", 11).unwrap();

        assert!(upgrade(&mut conn).is_err());
        assert_eq!(read_version(&conn).unwrap(), 11);
    }

    #[test]
    fn test_garbage_file_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        std::fs::write(&path, "not a database ".repeat(100)).unwrap();

        for wal in [false, true] {
            let options = StoreOptions { wal, ..StoreOptions::default() };
            let err = Database::open_with(&path, options).err().unwrap();
            assert!(matches!(err, Error::StorageUnavailable { .. }), "wal = {wal}");
        }
    }

    #[test]
    fn test_unopenable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("store.db");
        let err = Database::open(&path).err().unwrap();
        assert!(matches!(err, Error::StorageUnavailable { .. }));
    }
}

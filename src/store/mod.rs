//! Record Store - URI-addressed CRUD over both collections
//!
//! Every operation resolves its identifier through [`crate::uri::resolve`]
//! first; item-level identifiers narrow the caller's filter with an `_id`
//! predicate. Successful mutations are announced through the store's
//! [`ChangeNotifier`].

mod cursor;

pub use cursor::{Cursor, Row};

use crate::filter::{order_by, Filter, SortOrder};
use crate::notify::{ChangeNotifier, NoopNotifier};
use crate::record::{Collection, TrackRecord, UploadRecord, ID};
use crate::storage::Database;
use crate::uri::{self, Cardinality, ResourceUri, Target};
use crate::value::{ContentValues, Value};
use crate::{Error, Operation, Result};
use rusqlite::params_from_iter;
use std::path::Path;
use std::sync::Arc;

/// Uploads and tracks behind one identifier-addressed interface
pub struct RecordStore {
    db: Database,
    notifier: Arc<dyn ChangeNotifier>,
}

impl RecordStore {
    /// Wrap an open database; announcements are discarded
    pub fn new(db: Database) -> Self {
        Self::with_notifier(db, Arc::new(NoopNotifier))
    }

    pub fn with_notifier(db: Database, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { db, notifier }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Type marker of the resource an identifier denotes
    pub fn get_type(&self, identifier: &str) -> Result<&'static str> {
        uri::get_type(identifier)
    }

    /// Insert a row into a collection, returning its item identifier
    pub fn insert(&self, identifier: &str, values: &ContentValues) -> Result<ResourceUri> {
        let target = resolve_for(identifier, Operation::Insert, &[Cardinality::Collection])?;
        let collection = target.collection();
        check_writable(collection, values)?;

        let (sql, params): (String, Vec<&Value>) = if values.is_empty() {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES (NULL)",
                collection.table(),
                collection.null_column_hack()
            );
            (sql, Vec::new())
        } else {
            let names: Vec<&str> = values.keys().collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                collection.table(),
                names.join(", "),
                vec!["?"; names.len()].join(", ")
            );
            (sql, values.iter().map(|(_, v)| v).collect())
        };
        tracing::debug!("{} <- {}", identifier, sql);

        let conn = self.db.connection();
        conn.execute(&sql, params_from_iter(params))
            .map_err(|e| Error::InsertFailed {
                uri: identifier.to_string(),
                reason: e.to_string(),
                source: Some(e),
            })?;

        let row_id = conn.last_insert_rowid();
        if row_id < 0 {
            return Err(Error::InsertFailed {
                uri: identifier.to_string(),
                reason: format!("store returned row id {}", row_id),
                source: None,
            });
        }

        let new_uri = ResourceUri::from(target).with_appended_id(row_id);
        self.notifier.notify_change(&new_uri);
        Ok(new_uri)
    }

    /// Select rows.
    ///
    /// `projection` of `None` selects every declared column; `sort` of `None`
    /// applies the collection's default order (`_id ASC`).
    pub fn query(
        &self,
        identifier: &str,
        projection: Option<&[&str]>,
        filter: Option<Filter>,
        sort: Option<&SortOrder>,
    ) -> Result<Cursor<'_>> {
        let target = resolve_for(
            identifier,
            Operation::Query,
            &[Cardinality::Collection, Cardinality::Item],
        )?;
        let collection = target.collection();

        let columns: Vec<String> = match projection {
            Some(names) => names
                .iter()
                .map(|n| collection.column(n).map(|c| c.name.to_string()))
                .collect::<Result<_>>()?,
            None => collection.column_names().into_iter().map(String::from).collect(),
        };

        let selection = narrow(target, filter)
            .map(|f| f.compile(collection))
            .transpose()?
            .unwrap_or_default();

        let keys = match sort {
            Some(sort) if !sort.is_empty() => sort.resolve(collection)?,
            _ => collection.default_sort_order().resolve(collection)?,
        };
        tracing::debug!(
            "{} -> {}{} ORDER BY {}",
            identifier,
            collection.table(),
            selection.where_sql(),
            order_by(&keys)
        );

        Cursor::open(
            self.db.connection(),
            collection.table(),
            columns,
            selection,
            keys,
            self.db.options().page_size,
            ResourceUri::from(target),
        )
    }

    /// Update one row, returning the number of rows changed (0 or 1)
    pub fn update(&self, identifier: &str, values: &ContentValues, filter: Option<Filter>) -> Result<usize> {
        let target = resolve_for(identifier, Operation::Update, &[Cardinality::Item])?;
        let collection = target.collection();
        if values.is_empty() {
            return Err(Error::EmptyValues);
        }
        check_writable(collection, values)?;

        let selection = narrow(target, filter)
            .map(|f| f.compile(collection))
            .transpose()?
            .unwrap_or_default();

        let assignments: Vec<String> = values.keys().map(|k| format!("{} = ?", k)).collect();
        let sql = format!(
            "UPDATE {} SET {}{}",
            collection.table(),
            assignments.join(", "),
            selection.where_sql()
        );
        tracing::debug!("{} <- {}", identifier, sql);

        let params = values.iter().map(|(_, v)| v).chain(selection.params.iter());
        let count = self.db.connection().execute(&sql, params_from_iter(params))?;

        self.notifier.notify_change(&ResourceUri::from(target));
        Ok(count)
    }

    /// Delete rows, returning how many were removed
    pub fn delete(&self, identifier: &str, filter: Option<Filter>) -> Result<usize> {
        let target = resolve_for(
            identifier,
            Operation::Delete,
            &[Cardinality::Collection, Cardinality::Item],
        )?;
        let collection = target.collection();

        let selection = narrow(target, filter)
            .map(|f| f.compile(collection))
            .transpose()?
            .unwrap_or_default();

        let sql = format!("DELETE FROM {}{}", collection.table(), selection.where_sql());
        tracing::debug!("{} <- {}", identifier, sql);

        let count = self
            .db
            .connection()
            .execute(&sql, params_from_iter(selection.params.iter()))?;

        self.notifier.notify_change(&ResourceUri::from(target));
        Ok(count)
    }

    // ========== Typed helpers ==========

    pub fn insert_upload(&self, upload: &UploadRecord) -> Result<ResourceUri> {
        self.insert(Collection::Uploads.as_str(), &upload.to_values())
    }

    pub fn get_upload(&self, id: i64) -> Result<Option<UploadRecord>> {
        let uri = ResourceUri::item(Collection::Uploads, id).to_uri_string();
        self.query(&uri, None, None, None)?
            .next()
            .transpose()?
            .map(|row| UploadRecord::from_row(&row))
            .transpose()
    }

    /// Uploads matching `filter`, in default order
    pub fn list_uploads(&self, filter: Option<Filter>) -> Result<Vec<UploadRecord>> {
        self.query(Collection::Uploads.as_str(), None, filter, None)?
            .map(|row| row.and_then(|r| UploadRecord::from_row(&r)))
            .collect()
    }

    pub fn insert_track(&self, track: &TrackRecord) -> Result<ResourceUri> {
        self.insert(Collection::Tracks.as_str(), &track.to_values())
    }

    pub fn get_track(&self, id: i64) -> Result<Option<TrackRecord>> {
        let uri = ResourceUri::item(Collection::Tracks, id).to_uri_string();
        self.query(&uri, None, None, None)?
            .next()
            .transpose()?
            .map(|row| TrackRecord::from_row(&row))
            .transpose()
    }

    /// Cached track for a remote track id
    pub fn find_track(&self, track_id: i64) -> Result<Option<TrackRecord>> {
        self.query(
            Collection::Tracks.as_str(),
            None,
            Some(Filter::eq("track_id", track_id)),
            None,
        )?
        .next()
        .transpose()?
        .map(|row| TrackRecord::from_row(&row))
        .transpose()
    }
}

/// Resolve and check the target's cardinality is allowed for `operation`
fn resolve_for(identifier: &str, operation: Operation, allowed: &[Cardinality]) -> Result<Target> {
    let target = uri::resolve(identifier)?;
    if !allowed.contains(&target.cardinality()) {
        return Err(Error::InvalidOperationForTarget {
            operation,
            uri: identifier.to_string(),
        });
    }
    Ok(target)
}

/// AND the item's row id in front of the caller's filter
fn narrow(target: Target, filter: Option<Filter>) -> Option<Filter> {
    match target.id() {
        Some(id) => Some(Filter::id(id).and_then(filter)),
        None => filter,
    }
}

fn check_writable(collection: Collection, values: &ContentValues) -> Result<()> {
    for key in values.keys() {
        let column = collection.column(key)?;
        if column.name == ID {
            return Err(Error::ReadOnlyColumn {
                collection,
                column: key.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChangeBus;
    use crate::storage::StoreOptions;
    use crossbeam::channel::Receiver;

    fn demo_upload() -> ContentValues {
        ContentValues::new()
            .with("title", "demo.mp3")
            .with("path", "/sdcard/demo.mp3")
    }

    fn observed_store() -> (RecordStore, Receiver<ResourceUri>, Receiver<ResourceUri>) {
        let bus = Arc::new(ChangeBus::new());
        let uploads = bus.subscribe(ResourceUri::collection(Collection::Uploads), true);
        let tracks = bus.subscribe(ResourceUri::collection(Collection::Tracks), true);
        let store = RecordStore::with_notifier(Database::open_in_memory().unwrap(), bus);
        (store, uploads, tracks)
    }

    fn drain(rx: &Receiver<ResourceUri>) -> Vec<String> {
        rx.try_iter().map(|u| u.to_uri_string()).collect()
    }

    #[test]
    fn test_upload_lifecycle() {
        let (store, uploads, _) = observed_store();

        let uri = store.insert("uploads", &demo_upload()).unwrap();
        assert_eq!(uri.to_uri_string(), "uploads/1");

        let rows: Vec<Row> = store
            .query("uploads/1", None, None, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("title").unwrap(), "demo.mp3");

        let status = ContentValues::new().with("status", "uploading");
        assert_eq!(store.update("uploads/1", &status, None).unwrap(), 1);
        assert_eq!(store.delete("uploads/1", None).unwrap(), 1);
        assert_eq!(store.query("uploads/1", None, None, None).unwrap().count(), 0);

        assert_eq!(drain(&uploads), vec!["uploads/1", "uploads/1", "uploads/1"]);
    }

    #[test]
    fn test_insert_then_query_both_collections() {
        let store = RecordStore::open_in_memory().unwrap();

        let upload = store.insert("uploads", &demo_upload()).unwrap();
        let track = store
            .insert(
                "tracks",
                &ContentValues::new()
                    .with("title", "Intro")
                    .with("track_id", 9911i64)
                    .with("duration", 215000i64),
            )
            .unwrap();

        let row = store
            .query(&upload.to_uri_string(), None, None, None)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>("path").unwrap(), "/sdcard/demo.mp3");
        assert_eq!(row.get::<Option<String>>("status").unwrap(), None);

        let record = store.get_track(track.id().unwrap()).unwrap().unwrap();
        assert_eq!(record.track_id, Some(9911));
        assert_eq!(record.duration, Some(215000));
        assert_eq!(record.stream_url, None);
    }

    #[test]
    fn test_missing_item() {
        let store = RecordStore::open_in_memory().unwrap();
        store.insert("tracks", &ContentValues::new().with("title", "x")).unwrap();

        assert_eq!(store.query("tracks/99", None, None, None).unwrap().count(), 0);
        let values = ContentValues::new().with("title", "y");
        assert_eq!(store.update("tracks/99", &values, None).unwrap(), 0);
        assert_eq!(store.delete("tracks/99", None).unwrap(), 0);
        assert_eq!(store.database().count_rows(Collection::Tracks).unwrap(), 1);
    }

    #[test]
    fn test_row_ids_not_reused() {
        let store = RecordStore::open_in_memory().unwrap();
        let first = store.insert("uploads", &demo_upload()).unwrap();
        let second = store.insert("uploads", &demo_upload()).unwrap();
        assert_eq!(store.delete(&second.to_uri_string(), None).unwrap(), 1);

        for _ in 0..3 {
            let uri = store.insert("uploads", &demo_upload()).unwrap();
            assert_ne!(uri, second);
            assert!(uri.id().unwrap() > second.id().unwrap());
        }
        assert_eq!(first.id(), Some(1));
    }

    #[test]
    fn test_invalid_targets() {
        let (store, uploads, tracks) = observed_store();

        let err = store.insert("uploads/1", &demo_upload()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidOperationForTarget { operation: Operation::Insert, .. }
        ));

        let err = store
            .update("uploads", &ContentValues::new().with("status", "done"), None)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidOperationForTarget { operation: Operation::Update, .. }
        ));

        for bad in ["playlists", "uploads/x", "tracks/1/2"] {
            assert!(matches!(
                store.insert(bad, &demo_upload()).unwrap_err(),
                Error::UnrecognizedIdentifier(_)
            ));
            assert!(matches!(
                store.query(bad, None, None, None).err().unwrap(),
                Error::UnrecognizedIdentifier(_)
            ));
            assert!(matches!(
                store.delete(bad, None).unwrap_err(),
                Error::UnrecognizedIdentifier(_)
            ));
        }

        // nothing was written and nothing announced
        assert_eq!(store.database().count_rows(Collection::Uploads).unwrap(), 0);
        assert!(drain(&uploads).is_empty());
        assert!(drain(&tracks).is_empty());
    }

    #[test]
    fn test_unknown_and_readonly_fields_rejected() {
        let store = RecordStore::open_in_memory().unwrap();

        let err = store
            .insert("tracks", &ContentValues::new().with("genre", "house"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { collection: Collection::Tracks, .. }));

        let err = store
            .insert("uploads", &ContentValues::new().with("_id", 5i64))
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnlyColumn { .. }));

        store.insert("uploads", &demo_upload()).unwrap();
        let err = store
            .update("uploads/1", &ContentValues::new().with("duration", 1i64), None)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));

        let err = store.update("uploads/1", &ContentValues::new(), None).unwrap_err();
        assert!(matches!(err, Error::EmptyValues));
    }

    #[test]
    fn test_empty_insert_uses_null_title() {
        let store = RecordStore::open_in_memory().unwrap();
        let uri = store.insert("uploads", &ContentValues::new()).unwrap();
        let upload = store.get_upload(uri.id().unwrap()).unwrap().unwrap();
        assert_eq!(upload.title, None);
        assert_eq!(upload.id, uri.id());
    }

    #[test]
    fn test_insert_failed_keeps_context() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .database()
            .connection()
            .execute_batch(
                "CREATE TRIGGER no_tracks BEFORE INSERT ON tracks BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )
            .unwrap();

        let err = store
            .insert("tracks", &ContentValues::new().with("title", "x"))
            .unwrap_err();
        match err {
            Error::InsertFailed { uri, reason, source } => {
                assert_eq!(uri, "tracks");
                assert!(reason.contains("read only"));
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_item_filter_is_anded() {
        let store = RecordStore::open_in_memory().unwrap();
        store.insert("uploads", &demo_upload().with("status", "pending")).unwrap();

        let matching = Filter::eq("status", "pending");
        let other = Filter::eq("status", "failed");
        assert_eq!(store.query("uploads/1", None, Some(matching.clone()), None).unwrap().count(), 1);
        assert_eq!(store.query("uploads/1", None, Some(other.clone()), None).unwrap().count(), 0);

        let values = ContentValues::new().with("sharing", "private");
        assert_eq!(store.update("uploads/1", &values, Some(other.clone())).unwrap(), 0);
        assert_eq!(store.update("uploads/1", &values, Some(matching)).unwrap(), 1);
        assert_eq!(store.delete("uploads/1", Some(other)).unwrap(), 0);
    }

    #[test]
    fn test_item_narrowing_cannot_be_escaped() {
        let (store, uploads, _) = observed_store();
        for _ in 0..3 {
            store.insert("uploads", &demo_upload()).unwrap();
        }
        drain(&uploads);

        let escape = || Some(Filter::sql("1) OR (1", Vec::<Value>::new()));
        let values = ContentValues::new().with("status", "x");
        assert!(matches!(
            store.update("uploads/1", &values, escape()).unwrap_err(),
            Error::InvalidFilter(_)
        ));
        assert!(matches!(
            store.delete("uploads/1", escape()).unwrap_err(),
            Error::InvalidFilter(_)
        ));
        assert!(matches!(
            store.query("uploads/1", None, escape(), None).err().unwrap(),
            Error::InvalidFilter(_)
        ));

        let touched = store
            .query("uploads", None, Some(Filter::is_not_null("status")), None)
            .unwrap()
            .count();
        assert_eq!(touched, 0);
        assert_eq!(store.database().count_rows(Collection::Uploads).unwrap(), 3);
        assert!(drain(&uploads).is_empty());

        // a closed clause still narrows to the one row
        let closed = Some(Filter::sql("(1) OR (1)", Vec::<Value>::new()));
        assert_eq!(store.update("uploads/1", &values, closed).unwrap(), 1);
    }

    #[test]
    fn test_collection_delete_with_filter() {
        let (store, uploads, _) = observed_store();
        for status in ["done", "pending", "done"] {
            store.insert("uploads", &demo_upload().with("status", status)).unwrap();
        }
        drain(&uploads);

        let removed = store
            .delete("uploads", Some(Filter::sql("status = ?", ["done"])))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(drain(&uploads), vec!["uploads"]);
        assert_eq!(store.delete("uploads", None).unwrap(), 1);
    }

    #[test]
    fn test_sort_and_projection() {
        let store = RecordStore::open_in_memory().unwrap();
        for title in ["b", "c", "a"] {
            store.insert("tracks", &ContentValues::new().with("title", title)).unwrap();
        }

        let default: Vec<i64> = store
            .query("tracks", Some(&["_id"][..]), None, None)
            .unwrap()
            .map(|r| r.unwrap().get::<i64>("_id").unwrap())
            .collect();
        assert_eq!(default, vec![1, 2, 3]);

        let cursor = store
            .query("tracks", Some(&["title"][..]), None, Some(&SortOrder::desc("title")))
            .unwrap();
        assert_eq!(cursor.columns(), ["title".to_string()]);
        let titles: Vec<String> = cursor.map(|r| r.unwrap().get("title").unwrap()).collect();
        assert_eq!(titles, vec!["c", "b", "a"]);

        assert!(matches!(
            store.query("tracks", Some(&["status"][..]), None, None).err().unwrap(),
            Error::UnknownColumn { .. }
        ));
    }

    #[test]
    fn test_cursor_pages_and_rewinds() {
        let store = paged_store(2);
        for i in 0..5i64 {
            store.insert("tracks", &ContentValues::new().with("track_id", i)).unwrap();
        }

        let mut cursor = store.query("tracks", None, None, None).unwrap();
        assert_eq!(cursor.notification_uri().to_uri_string(), "tracks");
        let first: Vec<Row> = cursor.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(first.len(), 5);
        assert!(cursor.next().is_none());

        cursor.rewind().unwrap();
        let again: Vec<Row> = cursor.collect::<Result<_>>().unwrap();
        assert_eq!(again, first);
    }

    fn paged_store(page_size: usize) -> RecordStore {
        let options = StoreOptions { page_size, ..StoreOptions::default() };
        let db = Database::from_connection_with(rusqlite::Connection::open_in_memory().unwrap(), options)
            .unwrap();
        RecordStore::new(db)
    }

    #[test]
    fn test_cursor_survives_deletes_between_pages() {
        let store = paged_store(2);
        for i in 0..6i64 {
            store.insert("tracks", &ContentValues::new().with("track_id", i)).unwrap();
        }

        let mut seen = Vec::new();
        for row in store.query("tracks", None, None, None).unwrap() {
            let id: i64 = row.unwrap().get(ID).unwrap();
            seen.push(id);
            let uri = ResourceUri::item(Collection::Tracks, id).to_uri_string();
            assert_eq!(store.delete(&uri, None).unwrap(), 1);
        }

        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(store.database().count_rows(Collection::Tracks).unwrap(), 0);
    }

    #[test]
    fn test_cursor_pages_through_sort_ties() {
        let store = paged_store(2);
        for title in ["b", "a", "b", "b", "a"] {
            store.insert("tracks", &ContentValues::new().with("title", title)).unwrap();
        }
        store.insert("tracks", &ContentValues::new()).unwrap();

        let ids = |sort: SortOrder| -> Vec<i64> {
            store
                .query("tracks", Some(&["_id"][..]), None, Some(&sort))
                .unwrap()
                .map(|r| r.unwrap().get::<i64>(ID).unwrap())
                .collect()
        };
        // NULL title first ascending, last descending; ties by _id
        assert_eq!(ids(SortOrder::asc("title")), vec![6, 2, 5, 1, 3, 4]);
        assert_eq!(ids(SortOrder::desc("title")), vec![1, 3, 4, 2, 5, 6]);
    }

    #[test]
    fn test_typed_helpers() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut upload = UploadRecord::new("demo.mp3", "/sdcard/demo.mp3");
        upload.genre = Some("ambient".to_string());
        store.insert_upload(&upload).unwrap();

        let listed = store.list_uploads(Some(Filter::eq("genre", "ambient"))).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path.as_deref(), Some("/sdcard/demo.mp3"));

        store
            .insert_track(&TrackRecord::new("Intro", 4242, "https://example.invalid/s"))
            .unwrap();
        assert!(store.find_track(4242).unwrap().is_some());
        assert!(store.find_track(1).unwrap().is_none());
    }

    #[test]
    fn test_get_type() {
        let store = RecordStore::open_in_memory().unwrap();
        assert_eq!(store.get_type("uploads/3").unwrap(), "vnd.sonicstore.item/upload");
        assert_eq!(store.get_type("tracks").unwrap(), "vnd.sonicstore.dir/track");
    }
}

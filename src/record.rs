//! Record collections and their declared column sets
//!
//! Two collections live in the store:
//! - `Uploads`: local files queued for upload, mutated through the upload lifecycle
//! - `Tracks`: cached metadata for tracks on the remote service

use crate::filter::SortOrder;
use crate::store::Row;
use crate::value::{ContentValues, Value};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Row identifier column shared by both tables
pub const ID: &str = "_id";

/// Declared storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }

    /// Coerce textual input (e.g. from the command line) into a typed value
    pub fn coerce(&self, raw: &str) -> Value {
        match self {
            ColumnType::Integer => raw
                .parse::<i64>()
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::Text(raw.to_string())),
            ColumnType::Text => Value::Text(raw.to_string()),
        }
    }
}

/// A column in a collection's table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

impl Column {
    const fn integer(name: &'static str) -> Self {
        Self { name, kind: ColumnType::Integer }
    }

    const fn text(name: &'static str) -> Self {
        Self { name, kind: ColumnType::Text }
    }
}

const UPLOAD_COLUMNS: &[Column] = &[
    Column::integer(ID),
    Column::text("title"),
    Column::text("path"),
    Column::text("status"),
    Column::text("sharing"),
    Column::text("description"),
    Column::text("genre"),
    Column::text("track_type"),
];

const TRACK_COLUMNS: &[Column] = &[
    Column::integer(ID),
    Column::text("title"),
    Column::integer("track_id"),
    Column::text("stream_url"),
    Column::integer("duration"),
];

/// A record collection, backed by one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Uploads,
    Tracks,
}

impl Collection {
    /// Path segment and table name
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Uploads => "uploads",
            Collection::Tracks => "tracks",
        }
    }

    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    pub fn all() -> &'static [Collection] {
        &[Collection::Uploads, Collection::Tracks]
    }

    /// All declared columns, `_id` first
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Collection::Uploads => UPLOAD_COLUMNS,
            Collection::Tracks => TRACK_COLUMNS,
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }

    /// Look up a declared column by name
    pub fn column(&self, name: &str) -> Result<&'static Column> {
        self.columns()
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::UnknownColumn {
                collection: *self,
                column: name.to_string(),
            })
    }

    /// Column written as NULL when an insert carries no values
    pub fn null_column_hack(&self) -> &'static str {
        "title"
    }

    /// Order applied when a query gives none: `_id ASC`
    pub fn default_sort_order(&self) -> SortOrder {
        SortOrder::asc(ID)
    }

    /// Type marker for the whole collection
    pub fn dir_type(&self) -> &'static str {
        match self {
            Collection::Uploads => "vnd.sonicstore.dir/upload",
            Collection::Tracks => "vnd.sonicstore.dir/track",
        }
    }

    /// Type marker for a single row
    pub fn item_type(&self) -> &'static str {
        match self {
            Collection::Uploads => "vnd.sonicstore.item/upload",
            Collection::Tracks => "vnd.sonicstore.item/track",
        }
    }

    /// Coerce textual `key=value` input into typed values for this collection
    pub fn coerce_values<'a, I>(&self, pairs: I) -> Result<ContentValues>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut values = ContentValues::new();
        for (key, raw) in pairs {
            let column = self.column(key)?;
            values.put(key, column.kind.coerce(raw));
        }
        Ok(values)
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploads" => Ok(Collection::Uploads),
            "tracks" => Ok(Collection::Tracks),
            _ => Err(Error::UnrecognizedIdentifier(s.to_string())),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A local file queued for upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Row id, `None` until stored
    pub id: Option<i64>,
    pub title: Option<String>,
    /// Local file path
    pub path: Option<String>,
    /// Upload lifecycle state
    pub status: Option<String>,
    /// Visibility setting
    pub sharing: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub track_type: Option<String>,
}

impl UploadRecord {
    pub fn new(title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Field map for insert; unset fields are left out
    pub fn to_values(&self) -> ContentValues {
        let fields = [
            ("title", &self.title),
            ("path", &self.path),
            ("status", &self.status),
            ("sharing", &self.sharing),
            ("description", &self.description),
            ("genre", &self.genre),
            ("track_type", &self.track_type),
        ];
        fields
            .into_iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, v.clone())))
            .collect()
    }

    /// Build from a row carrying every upload column
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(ID)?,
            title: row.get("title")?,
            path: row.get("path")?,
            status: row.get("status")?,
            sharing: row.get("sharing")?,
            description: row.get("description")?,
            genre: row.get("genre")?,
            track_type: row.get("track_type")?,
        })
    }
}

/// Cached metadata of a remote track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: Option<i64>,
    pub title: Option<String>,
    /// Track id on the remote service
    pub track_id: Option<i64>,
    pub stream_url: Option<String>,
    /// Length in milliseconds
    pub duration: Option<i64>,
}

impl TrackRecord {
    pub fn new(title: impl Into<String>, track_id: i64, stream_url: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            track_id: Some(track_id),
            stream_url: Some(stream_url.into()),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = i64::try_from(duration.as_millis()).ok();
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis)
    }

    pub fn to_values(&self) -> ContentValues {
        let mut values = ContentValues::new();
        if let Some(title) = &self.title {
            values.put("title", title.as_str());
        }
        if let Some(track_id) = self.track_id {
            values.put("track_id", track_id);
        }
        if let Some(url) = &self.stream_url {
            values.put("stream_url", url.as_str());
        }
        if let Some(duration) = self.duration {
            values.put("duration", duration);
        }
        values
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(ID)?,
            title: row.get("title")?,
            track_id: row.get("track_id")?,
            stream_url: row.get("stream_url")?,
            duration: row.get("duration")?,
        })
    }
}

//! Database schema definitions and upgrade paths

use crate::{Error, Result};

/// Version written to `PRAGMA user_version` once the schema is current
pub const SCHEMA_VERSION: i32 = 12;

/// SQL to create the uploads table
pub const CREATE_UPLOADS_TABLE: &str = r#"
CREATE TABLE uploads (
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT,
    path TEXT,
    status TEXT,
    sharing TEXT,
    description TEXT,
    genre TEXT,
    track_type TEXT
)
"#;

/// SQL to create the tracks table
pub const CREATE_TRACKS_TABLE: &str = r#"
CREATE TABLE tracks (
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT,
    track_id INTEGER,
    stream_url TEXT,
    duration INTEGER
)
"#;

pub const DROP_UPLOADS_TABLE: &str = "DROP TABLE IF EXISTS uploads";
pub const DROP_TRACKS_TABLE: &str = "DROP TABLE IF EXISTS tracks";

/// Version 11 stores lack the track duration column
pub const ADD_TRACK_DURATION: &str = "ALTER TABLE tracks ADD COLUMN duration INTEGER";

// Legacy tables were created without AUTOINCREMENT, so a deleted highest
// row id could be handed out again. Kept rows are copied into a fresh table.

pub const SET_ASIDE_UPLOADS: &str = "ALTER TABLE uploads RENAME TO uploads_legacy";
pub const COPY_LEGACY_UPLOADS: &str = r#"
INSERT INTO uploads (_id, title, path, status, sharing, description, genre, track_type)
SELECT _id, title, path, status, sharing, description, genre, track_type FROM uploads_legacy
"#;
pub const DROP_LEGACY_UPLOADS: &str = "DROP TABLE uploads_legacy";

pub const SET_ASIDE_TRACKS: &str = "ALTER TABLE tracks RENAME TO tracks_legacy";
pub const COPY_LEGACY_TRACKS: &str = r#"
INSERT INTO tracks (_id, title, track_id, stream_url, duration)
SELECT _id, title, track_id, stream_url, duration FROM tracks_legacy
"#;
pub const DROP_LEGACY_TRACKS: &str = "DROP TABLE tracks_legacy";

/// What has to happen to bring a store at some version up to [`SCHEMA_VERSION`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Already current
    UpToDate,
    /// Empty store: create both tables
    Create,
    /// Version 11: add `tracks.duration`, keeping rows; both tables are
    /// rebuilt with `AUTOINCREMENT` ids
    AddTrackDuration,
    /// Version 10: recreate the tracks table, dropping cached tracks; uploads
    /// are rebuilt with `AUTOINCREMENT` ids
    RecreateTracks,
    /// Anything older: drop and recreate both tables
    Rebuild,
}

impl Migration {
    /// Pick the upgrade path for a stored version
    pub fn for_version(version: i32) -> Result<Self> {
        match version {
            SCHEMA_VERSION => Ok(Migration::UpToDate),
            v if v > SCHEMA_VERSION => Err(Error::UnsupportedSchemaVersion {
                found: v,
                supported: SCHEMA_VERSION,
            }),
            0 => Ok(Migration::Create),
            11 => Ok(Migration::AddTrackDuration),
            10 => Ok(Migration::RecreateTracks),
            _ => Ok(Migration::Rebuild),
        }
    }

    /// Statements to run, in order
    pub fn statements(&self) -> &'static [&'static str] {
        match self {
            Migration::UpToDate => &[],
            Migration::Create => &[CREATE_UPLOADS_TABLE, CREATE_TRACKS_TABLE],
            Migration::AddTrackDuration => &[
                ADD_TRACK_DURATION,
                SET_ASIDE_TRACKS,
                CREATE_TRACKS_TABLE,
                COPY_LEGACY_TRACKS,
                DROP_LEGACY_TRACKS,
                SET_ASIDE_UPLOADS,
                CREATE_UPLOADS_TABLE,
                COPY_LEGACY_UPLOADS,
                DROP_LEGACY_UPLOADS,
            ],
            Migration::RecreateTracks => &[
                DROP_TRACKS_TABLE,
                CREATE_TRACKS_TABLE,
                SET_ASIDE_UPLOADS,
                CREATE_UPLOADS_TABLE,
                COPY_LEGACY_UPLOADS,
                DROP_LEGACY_UPLOADS,
            ],
            Migration::Rebuild => &[
                DROP_UPLOADS_TABLE,
                DROP_TRACKS_TABLE,
                CREATE_UPLOADS_TABLE,
                CREATE_TRACKS_TABLE,
            ],
        }
    }

    /// Whether stored rows are dropped on this path
    pub fn is_destructive(&self) -> bool {
        matches!(self, Migration::RecreateTracks | Migration::Rebuild)
    }
}

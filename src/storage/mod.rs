//! Storage Layer - SQLite-backed persistence
//!
//! One store file holds two tables and a schema version:
//! - uploads(_id, title, path, status, sharing, description, genre, track_type)
//! - tracks(_id, title, track_id, stream_url, duration)
//! - `PRAGMA user_version` = current schema version

pub mod database;
pub mod schema;

pub use database::{Database, StoreOptions};
pub use schema::{Migration, SCHEMA_VERSION};

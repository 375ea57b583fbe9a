//! Resource identifiers and routing
//!
//! Format: `<collection>` or `<collection>/<row-id>`
//!
//! Examples:
//! - `uploads` - every queued upload
//! - `tracks/42` - the cached track with row id 42

use crate::record::Collection;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Whether an identifier addresses a whole collection or a single row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    Collection,
    Item,
}

/// Resolved operation target.
///
/// Every identifier the router accepts maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Uploads,
    Upload(i64),
    Tracks,
    Track(i64),
}

impl Target {
    pub fn collection(&self) -> Collection {
        match self {
            Target::Uploads | Target::Upload(_) => Collection::Uploads,
            Target::Tracks | Target::Track(_) => Collection::Tracks,
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Target::Uploads | Target::Tracks => Cardinality::Collection,
            Target::Upload(_) | Target::Track(_) => Cardinality::Item,
        }
    }

    /// Row id for item targets
    pub fn id(&self) -> Option<i64> {
        match self {
            Target::Upload(id) | Target::Track(id) => Some(*id),
            Target::Uploads | Target::Tracks => None,
        }
    }

    /// Type marker of the resource this target denotes
    pub fn content_type(&self) -> &'static str {
        match self.cardinality() {
            Cardinality::Collection => self.collection().dir_type(),
            Cardinality::Item => self.collection().item_type(),
        }
    }
}

/// One routing pattern segment
#[derive(Debug, Clone, Copy)]
enum Segment {
    Literal(&'static str),
    /// Plain non-negative integer
    Number,
}

#[derive(Debug, Clone, Copy)]
enum RouteKind {
    Uploads,
    UploadItem,
    Tracks,
    TrackItem,
}

struct Route {
    pattern: Vec<Segment>,
    kind: RouteKind,
}

/// Immutable table of identifier patterns.
struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    fn new() -> Self {
        let mut table = Self { routes: Vec::new() };
        table.add("uploads", RouteKind::Uploads);
        table.add("uploads/#", RouteKind::UploadItem);
        table.add("tracks", RouteKind::Tracks);
        table.add("tracks/#", RouteKind::TrackItem);
        table
    }

    fn add(&mut self, pattern: &'static str, kind: RouteKind) {
        let pattern = pattern
            .split('/')
            .map(|s| if s == "#" { Segment::Number } else { Segment::Literal(s) })
            .collect();
        self.routes.push(Route { pattern, kind });
    }

    fn resolve(&self, identifier: &str) -> Option<Target> {
        let segments: Vec<&str> = identifier.split('/').collect();

        'routes: for route in &self.routes {
            if route.pattern.len() != segments.len() {
                continue;
            }
            let mut id = None;
            for (segment, input) in route.pattern.iter().zip(&segments) {
                match segment {
                    Segment::Literal(lit) if lit == input => {}
                    Segment::Number => match parse_row_id(input) {
                        Some(n) => id = Some(n),
                        None => continue 'routes,
                    },
                    Segment::Literal(_) => continue 'routes,
                }
            }
            return Some(match (route.kind, id) {
                (RouteKind::Uploads, _) => Target::Uploads,
                (RouteKind::Tracks, _) => Target::Tracks,
                (RouteKind::UploadItem, Some(id)) => Target::Upload(id),
                (RouteKind::TrackItem, Some(id)) => Target::Track(id),
                (RouteKind::UploadItem | RouteKind::TrackItem, None) => continue,
            });
        }
        None
    }
}

fn parse_row_id(segment: &str) -> Option<i64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

static ROUTES: OnceLock<RoutingTable> = OnceLock::new();

/// Resolve an identifier string to its operation target
pub fn resolve(identifier: &str) -> Result<Target> {
    ROUTES
        .get_or_init(RoutingTable::new)
        .resolve(identifier)
        .ok_or_else(|| Error::UnrecognizedIdentifier(identifier.to_string()))
}

/// Type marker for an identifier, e.g. `vnd.sonicstore.item/upload`
pub fn get_type(identifier: &str) -> Result<&'static str> {
    resolve(identifier).map(|t| t.content_type())
}

/// A parsed resource identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    target: Target,
}

impl ResourceUri {
    pub fn collection(collection: Collection) -> Self {
        let target = match collection {
            Collection::Uploads => Target::Uploads,
            Collection::Tracks => Target::Tracks,
        };
        Self { target }
    }

    pub fn item(collection: Collection, id: i64) -> Self {
        let target = match collection {
            Collection::Uploads => Target::Upload(id),
            Collection::Tracks => Target::Track(id),
        };
        Self { target }
    }

    /// Parse an identifier string
    pub fn parse(identifier: &str) -> Result<Self> {
        resolve(identifier).map(|target| Self { target })
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn id(&self) -> Option<i64> {
        self.target.id()
    }

    pub fn is_item(&self) -> bool {
        self.target.cardinality() == Cardinality::Item
    }

    /// Item identifier for `id` within this identifier's collection
    pub fn with_appended_id(&self, id: i64) -> Self {
        Self::item(self.target.collection(), id)
    }

    /// Collection-level identifier this one belongs to
    pub fn parent(&self) -> Self {
        Self::collection(self.target.collection())
    }

    pub fn to_uri_string(&self) -> String {
        match self.target.id() {
            Some(id) => format!("{}/{}", self.target.collection(), id),
            None => self.target.collection().to_string(),
        }
    }
}

impl From<Target> for ResourceUri {
    fn from(target: Target) -> Self {
        Self { target }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri_string())
    }
}

impl FromStr for ResourceUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ResourceUri {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_uri_string())
    }
}

impl<'de> Deserialize<'de> for ResourceUri {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ResourceUri::parse(&s).map_err(serde::de::Error::custom)
    }
}

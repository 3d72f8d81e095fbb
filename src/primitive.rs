//! The read-only view of map data that compiled matches are evaluated against.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three kinds of OSM primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Node,
    Way,
    Relation,
}

impl PrimitiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Node => "node",
            PrimitiveKind::Way => "way",
            PrimitiveKind::Relation => "relation",
        }
    }

    /// Case-insensitive lookup from the `type:` keyword's argument.
    pub fn from_name(name: &str) -> Option<Self> {
        [PrimitiveKind::Node, PrimitiveKind::Way, PrimitiveKind::Relation]
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a primitive. New (not yet uploaded) primitives have a
/// negative `unique_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimitiveId {
    #[serde(rename = "type")]
    pub kind: PrimitiveKind,
    #[serde(rename = "id")]
    pub unique_id: i64,
}

impl PrimitiveId {
    pub fn new(kind: PrimitiveKind, unique_id: i64) -> Self {
        Self { kind, unique_id }
    }
}

impl fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.unique_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A lat/lon aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Bounds {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat: min_lat.min(max_lat),
            min_lon: min_lon.min(max_lon),
            max_lat: min_lat.max(max_lat),
            max_lon: min_lon.max(max_lon),
        }
    }

    pub fn contains(&self, point: LatLon) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }
}

/// A relation member: its role and the referenced primitive.
pub struct Member<'a> {
    pub role: String,
    pub primitive: Box<dyn Primitive + 'a>,
}

/// Everything a [`Match`](crate::Match) may ask of a primitive.
///
/// Implementations are expected to be cheap handles onto a larger data set;
/// navigation methods return boxed handles so the trait stays object safe.
pub trait Primitive {
    fn id(&self) -> PrimitiveId;

    fn kind(&self) -> PrimitiveKind {
        self.id().kind
    }

    fn unique_id(&self) -> i64 {
        self.id().unique_id
    }

    fn is_new(&self) -> bool {
        self.unique_id() <= 0
    }

    // Tags

    fn keys(&self) -> Vec<&str>;
    fn get(&self, key: &str) -> Option<&str>;

    fn has_keys(&self) -> bool {
        !self.keys().is_empty()
    }

    fn key_count(&self) -> usize {
        self.keys().len()
    }

    /// Whether the primitive carries at least one "interesting" tag.
    fn is_tagged(&self) -> bool {
        self.has_keys()
    }

    // Metadata

    fn version(&self) -> i64;
    fn changeset_id(&self) -> i64;
    fn timestamp(&self) -> Option<DateTime<Utc>>;
    fn user(&self) -> Option<&str>;

    // Editing state

    fn is_modified(&self) -> bool;
    fn is_new_or_undeleted(&self) -> bool;
    fn is_deleted(&self) -> bool;
    fn is_selected(&self) -> bool;
    fn is_incomplete(&self) -> bool;

    fn is_usable(&self) -> bool {
        !self.is_deleted() && !self.is_incomplete()
    }

    // Geometry and topology

    /// Nodes only.
    fn coordinate(&self) -> Option<LatLon>;
    /// Ways only; a closed way repeats its first node at the end.
    fn way_nodes(&self) -> Vec<Box<dyn Primitive + '_>>;
    /// Relations only.
    fn members(&self) -> Vec<Member<'_>>;
    /// Ways and relations referring to this primitive.
    fn referrers(&self) -> Vec<Box<dyn Primitive + '_>>;

    fn is_closed(&self) -> bool;
    /// Enclosed area in square metres, for closed ways and multipolygons.
    fn area(&self) -> Option<f64>;
    /// Length in metres, for ways.
    fn length(&self) -> Option<f64>;

    fn has_incomplete_members(&self) -> bool {
        self.members()
            .iter()
            .any(|member| member.primitive.is_incomplete())
    }
}

/// Supplies the rectangles `inview` and `indownloadedarea` test against.
pub trait BoundsProvider: fmt::Debug + Send + Sync {
    fn current_view_bounds(&self) -> Option<Bounds>;
    fn downloaded_area_bounds(&self) -> Option<Bounds>;
}

/// A fixed pair of rectangles, for hosts without a live map view.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticBounds {
    pub view: Option<Bounds>,
    pub downloaded: Option<Bounds>,
}

impl BoundsProvider for StaticBounds {
    fn current_view_bounds(&self) -> Option<Bounds> {
        self.view
    }

    fn downloaded_area_bounds(&self) -> Option<Bounds> {
        self.downloaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_name() {
        assert_eq!(PrimitiveKind::from_name("WAY"), Some(PrimitiveKind::Way));
        assert_eq!(PrimitiveKind::from_name("node"), Some(PrimitiveKind::Node));
        assert_eq!(PrimitiveKind::from_name("area"), None);
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = Bounds::new(10.0, 20.0, 0.0, 0.0);
        assert!(bounds.contains(LatLon::new(5.0, 5.0)));
        assert!(bounds.contains(LatLon::new(10.0, 20.0)));
        assert!(!bounds.contains(LatLon::new(10.5, 5.0)));
    }
}

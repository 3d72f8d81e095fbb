//! An in-memory OSM data set that compiled searches can run over.
//!
//! Way nodes and relation members that are referenced before they are
//! defined get an incomplete placeholder, which is filled in when the
//! primitive itself is added.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ast::Match;
use crate::config::{read_json_file, ConfigError};
use crate::primitive::{
    Bounds, LatLon, Member, Primitive, PrimitiveId, PrimitiveKind, StaticBounds,
};

/// WGS84 semi-major axis, in metres.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Keys that do not make a primitive "tagged" on their own. Entries ending
/// in ':' match as prefixes.
const UNINTERESTING_KEYS: &[&str] = &[
    "source",
    "source_ref",
    "source:",
    "comment",
    "watch",
    "watch:",
    "description",
    "attribution",
    "created_by",
    "converted_by",
];

fn is_uninteresting(key: &str) -> bool {
    UNINTERESTING_KEYS.iter().any(|candidate| {
        if candidate.ends_with(':') {
            key.starts_with(candidate)
        } else {
            key == *candidate
        }
    })
}

/// Server metadata and local editing state of one primitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub version: i64,
    pub changeset: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub user: Option<String>,
    pub modified: bool,
    pub deleted: bool,
    pub incomplete: bool,
    pub undeleted: bool,
}

/// A relation member as stored in the data set and in data set files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(rename = "type")]
    pub kind: PrimitiveKind,
    #[serde(rename = "ref")]
    pub id: i64,
    #[serde(default)]
    pub role: String,
}

impl MemberRecord {
    pub fn new(kind: PrimitiveKind, id: i64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }

    fn target(&self) -> PrimitiveId {
        PrimitiveId::new(self.kind, self.id)
    }
}

#[derive(Debug, Clone)]
enum Geometry {
    Node { coordinate: Option<LatLon> },
    Way { nodes: Vec<i64> },
    Relation { members: Vec<MemberRecord> },
}

impl Geometry {
    fn empty(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Node => Geometry::Node { coordinate: None },
            PrimitiveKind::Way => Geometry::Way { nodes: Vec::new() },
            PrimitiveKind::Relation => Geometry::Relation {
                members: Vec::new(),
            },
        }
    }

    fn children(&self) -> Vec<PrimitiveId> {
        match self {
            Geometry::Node { .. } => Vec::new(),
            Geometry::Way { nodes } => nodes
                .iter()
                .map(|id| PrimitiveId::new(PrimitiveKind::Node, *id))
                .collect(),
            Geometry::Relation { members } => members.iter().map(MemberRecord::target).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct PrimitiveData {
    tags: BTreeMap<String, String>,
    meta: Meta,
    geometry: Geometry,
}

impl PrimitiveData {
    fn placeholder(kind: PrimitiveKind) -> Self {
        Self {
            tags: BTreeMap::new(),
            meta: Meta {
                incomplete: true,
                ..Meta::default()
            },
            geometry: Geometry::empty(kind),
        }
    }
}

/// Nodes, ways and relations with tags, metadata, the current selection and
/// the two rectangles `inview` and `indownloadedarea` test against.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    primitives: BTreeMap<PrimitiveId, PrimitiveData>,
    referrers: HashMap<PrimitiveId, Vec<PrimitiveId>>,
    selected: HashSet<PrimitiveId>,
    view: Option<Bounds>,
    downloaded: Option<Bounds>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: i64, coordinate: LatLon) -> PrimitiveId {
        self.insert(
            PrimitiveId::new(PrimitiveKind::Node, id),
            Geometry::Node {
                coordinate: Some(coordinate),
            },
        )
    }

    /// Adds a way. A closed way lists its first node again at the end.
    pub fn add_way(&mut self, id: i64, nodes: &[i64]) -> PrimitiveId {
        self.insert(
            PrimitiveId::new(PrimitiveKind::Way, id),
            Geometry::Way {
                nodes: nodes.to_vec(),
            },
        )
    }

    pub fn add_relation(&mut self, id: i64, members: Vec<MemberRecord>) -> PrimitiveId {
        self.insert(
            PrimitiveId::new(PrimitiveKind::Relation, id),
            Geometry::Relation { members },
        )
    }

    /// Returns false when `id` is not in the data set.
    pub fn put_tag(
        &mut self,
        id: PrimitiveId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> bool {
        match self.primitives.get_mut(&id) {
            Some(data) => {
                data.tags.insert(key.into(), value.into());
                true
            }
            None => false,
        }
    }

    pub fn meta_mut(&mut self, id: PrimitiveId) -> Option<&mut Meta> {
        self.primitives.get_mut(&id).map(|data| &mut data.meta)
    }

    pub fn set_selected(&mut self, id: PrimitiveId, selected: bool) {
        if selected {
            self.selected.insert(id);
        } else {
            self.selected.remove(&id);
        }
    }

    pub fn set_view(&mut self, view: Option<Bounds>) {
        self.view = view;
    }

    pub fn set_downloaded_area(&mut self, downloaded: Option<Bounds>) {
        self.downloaded = downloaded;
    }

    /// A snapshot of the view and downloaded area, for
    /// [`MatchRegistry::with_builtins`](crate::MatchRegistry::with_builtins).
    pub fn bounds(&self) -> StaticBounds {
        StaticBounds {
            view: self.view,
            downloaded: self.downloaded,
        }
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn get(&self, id: PrimitiveId) -> Option<PrimitiveRef<'_>> {
        self.primitives
            .get_key_value(&id)
            .map(|(id, data)| PrimitiveRef::new(self, *id, data))
    }

    /// All primitives, ordered by kind and then id.
    pub fn primitives(&self) -> impl Iterator<Item = PrimitiveRef<'_>> {
        self.primitives
            .iter()
            .map(move |(id, data)| PrimitiveRef::new(self, *id, data))
    }

    pub fn search<'s>(&'s self, search: &'s Match) -> impl Iterator<Item = PrimitiveRef<'s>> + 's {
        self.primitives()
            .filter(move |primitive| search.evaluate(primitive))
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<DataSetFile>(json).map(Self::from)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json_file::<DataSetFile, _>(path).map(Self::from)
    }

    fn insert(&mut self, id: PrimitiveId, geometry: Geometry) -> PrimitiveId {
        self.unlink(id);
        for child in geometry.children() {
            self.primitives
                .entry(child)
                .or_insert_with(|| PrimitiveData::placeholder(child.kind));
            let referrers = self.referrers.entry(child).or_default();
            if !referrers.contains(&id) {
                referrers.push(id);
            }
        }

        let data = self
            .primitives
            .entry(id)
            .or_insert_with(|| PrimitiveData::placeholder(id.kind));
        data.geometry = geometry;
        data.meta.incomplete = false;
        id
    }

    fn fill(&mut self, id: PrimitiveId, tags: BTreeMap<String, String>, meta: Meta) {
        if let Some(data) = self.primitives.get_mut(&id) {
            data.tags = tags;
            data.meta = meta;
        }
    }

    fn unlink(&mut self, id: PrimitiveId) {
        let Some(data) = self.primitives.get(&id) else {
            return;
        };
        for child in data.geometry.children() {
            if let Some(referrers) = self.referrers.get_mut(&child) {
                referrers.retain(|referrer| *referrer != id);
            }
        }
    }
}

/// A borrowed handle onto one primitive of a [`DataSet`].
#[derive(Clone, Copy)]
pub struct PrimitiveRef<'a> {
    data_set: &'a DataSet,
    id: PrimitiveId,
    data: &'a PrimitiveData,
}

impl<'a> PrimitiveRef<'a> {
    fn new(data_set: &'a DataSet, id: PrimitiveId, data: &'a PrimitiveData) -> Self {
        Self { data_set, id, data }
    }

    pub fn tags(&self) -> &'a BTreeMap<String, String> {
        &self.data.tags
    }

    fn handle(&self, id: PrimitiveId) -> Option<PrimitiveRef<'a>> {
        self.data_set.get(id)
    }

    fn node_coordinates(&self) -> Option<Vec<LatLon>> {
        match &self.data.geometry {
            Geometry::Way { nodes } => nodes
                .iter()
                .map(|id| {
                    self.handle(PrimitiveId::new(PrimitiveKind::Node, *id))
                        .and_then(|node| node.coordinate())
                })
                .collect(),
            _ => None,
        }
    }

    fn multipolygon_area(&self, members: &[MemberRecord]) -> Option<f64> {
        let mut outer = None;
        let mut inner = 0.0;
        for member in members.iter().filter(|m| m.kind == PrimitiveKind::Way) {
            let Some(area) = self.handle(member.target()).and_then(|way| way.area()) else {
                continue;
            };
            match member.role.as_str() {
                "inner" => inner += area,
                _ => *outer.get_or_insert(0.0) += area,
            }
        }
        outer.map(|outer: f64| (outer - inner).max(0.0))
    }
}

impl fmt::Debug for PrimitiveRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveRef")
            .field("id", &self.id)
            .field("tags", &self.data.tags)
            .finish()
    }
}

impl fmt::Display for PrimitiveRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.data.tags.is_empty() {
            let tags: Vec<String> = self
                .data
                .tags
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            write!(f, " {{{}}}", tags.join(", "))?;
        }
        Ok(())
    }
}

impl Primitive for PrimitiveRef<'_> {
    fn id(&self) -> PrimitiveId {
        self.id
    }

    fn keys(&self) -> Vec<&str> {
        self.data.tags.keys().map(String::as_str).collect()
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.data.tags.get(key).map(String::as_str)
    }

    fn is_tagged(&self) -> bool {
        self.data.tags.keys().any(|key| !is_uninteresting(key))
    }

    fn version(&self) -> i64 {
        self.data.meta.version
    }

    fn changeset_id(&self) -> i64 {
        self.data.meta.changeset
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.data.meta.timestamp
    }

    fn user(&self) -> Option<&str> {
        self.data.meta.user.as_deref()
    }

    fn is_modified(&self) -> bool {
        self.data.meta.modified
    }

    fn is_new_or_undeleted(&self) -> bool {
        (self.is_new() && !self.data.meta.deleted) || self.data.meta.undeleted
    }

    fn is_deleted(&self) -> bool {
        self.data.meta.deleted
    }

    fn is_selected(&self) -> bool {
        self.data_set.selected.contains(&self.id)
    }

    fn is_incomplete(&self) -> bool {
        self.data.meta.incomplete
    }

    fn coordinate(&self) -> Option<LatLon> {
        match &self.data.geometry {
            Geometry::Node { coordinate } => *coordinate,
            _ => None,
        }
    }

    fn way_nodes(&self) -> Vec<Box<dyn Primitive + '_>> {
        match &self.data.geometry {
            Geometry::Way { nodes } => nodes
                .iter()
                .filter_map(|id| self.handle(PrimitiveId::new(PrimitiveKind::Node, *id)))
                .map(|node| Box::new(node) as Box<dyn Primitive + '_>)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn members(&self) -> Vec<Member<'_>> {
        match &self.data.geometry {
            Geometry::Relation { members } => members
                .iter()
                .filter_map(|member| {
                    self.handle(member.target()).map(|primitive| Member {
                        role: member.role.clone(),
                        primitive: Box::new(primitive),
                    })
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn referrers(&self) -> Vec<Box<dyn Primitive + '_>> {
        self.data_set
            .referrers
            .get(&self.id)
            .map(|referrers| {
                referrers
                    .iter()
                    .filter_map(|id| self.handle(*id))
                    .map(|referrer| Box::new(referrer) as Box<dyn Primitive + '_>)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_closed(&self) -> bool {
        match &self.data.geometry {
            Geometry::Way { nodes } => nodes.len() >= 3 && nodes.first() == nodes.last(),
            _ => false,
        }
    }

    fn area(&self) -> Option<f64> {
        match &self.data.geometry {
            Geometry::Way { .. } if self.is_closed() => {
                self.node_coordinates().map(|points| polygon_area(&points))
            }
            Geometry::Relation { members } if self.get("type") == Some("multipolygon") => {
                self.multipolygon_area(members)
            }
            _ => None,
        }
    }

    fn length(&self) -> Option<f64> {
        self.node_coordinates().map(|points| {
            points
                .windows(2)
                .map(|pair| great_circle_distance(pair[0], pair[1]))
                .sum()
        })
    }
}

/// Shoelace formula on an equirectangular projection around the mean
/// latitude. `ring` must repeat its first point at the end.
fn polygon_area(ring: &[LatLon]) -> f64 {
    if ring.len() < 4 {
        return 0.0;
    }
    let mean_lat = ring.iter().map(|point| point.lat).sum::<f64>() / ring.len() as f64;
    let scale = mean_lat.to_radians().cos();
    let project = |point: LatLon| {
        (
            EARTH_RADIUS * point.lon.to_radians() * scale,
            EARTH_RADIUS * point.lat.to_radians(),
        )
    };

    let twice: f64 = ring
        .windows(2)
        .map(|pair| {
            let (x1, y1) = project(pair[0]);
            let (x2, y2) = project(pair[1]);
            x1 * y2 - x2 * y1
        })
        .sum();
    (twice / 2.0).abs()
}

/// Haversine distance in metres.
fn great_circle_distance(a: LatLon, b: LatLon) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * h.sqrt().min(1.0).asin()
}

/// On-disk form of a [`DataSet`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSetFile {
    pub view: Option<Bounds>,
    pub downloaded: Option<Bounds>,
    pub selected: Vec<PrimitiveId>,
    pub nodes: Vec<NodeRecord>,
    pub ways: Vec<WayRecord>,
    pub relations: Vec<RelationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WayRecord {
    pub id: i64,
    #[serde(default)]
    pub nodes: Vec<i64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRecord {
    pub id: i64,
    #[serde(default)]
    pub members: Vec<MemberRecord>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub meta: Meta,
}

impl From<DataSetFile> for DataSet {
    fn from(file: DataSetFile) -> Self {
        let mut data_set = DataSet::new();
        data_set.view = file.view;
        data_set.downloaded = file.downloaded;

        for node in file.nodes {
            let id = PrimitiveId::new(PrimitiveKind::Node, node.id);
            let coordinate = match (node.lat, node.lon) {
                (Some(lat), Some(lon)) => Some(LatLon::new(lat, lon)),
                _ => None,
            };
            data_set.insert(id, Geometry::Node { coordinate });
            data_set.fill(id, node.tags, node.meta);
        }
        for way in file.ways {
            let id = data_set.add_way(way.id, &way.nodes);
            data_set.fill(id, way.tags, way.meta);
        }
        for relation in file.relations {
            let id = data_set.add_relation(relation.id, relation.members);
            data_set.fill(id, relation.tags, relation.meta);
        }
        for id in file.selected {
            data_set.set_selected(id, true);
        }
        data_set
    }
}

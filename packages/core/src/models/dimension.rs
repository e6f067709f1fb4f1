//! Dimension Space Value Types
//!
//! A content graph varies along named dimensions (language, region, ...).
//! One concrete coordinate tuple is a [`DimensionSpacePoint`]; the same value
//! in the "authored-in" role is an [`OriginDimensionSpacePoint`]. Points are
//! addressed everywhere by a content hash of their canonical JSON form so
//! that edges and queries can store a fixed-width key instead of a
//! variable-length tuple.
//!
//! # Examples
//!
//! ```rust
//! use contentgraph_core::models::{DimensionSpacePoint, DimensionSpacePointSet};
//!
//! let en = DimensionSpacePoint::from_pairs([("language", "en")]);
//! let de = DimensionSpacePoint::from_pairs([("language", "de")]);
//!
//! let set = DimensionSpacePointSet::from_points([en.clone(), de]);
//! assert!(set.contains(&en));
//! assert_eq!(set.len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Content hash of a dimension space point (hex-encoded blake3 of the
/// canonical JSON coordinates).
///
/// Used as the map key for point sets and as the `dimension_space_point_hash`
/// column on hierarchy edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpacePointHash(String);

impl DimensionSpacePointHash {
    /// Wrap an already-computed hash value (e.g. read back from storage).
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DimensionSpacePointHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A coordinate in the variation space: an immutable (dimension name ->
/// coordinate value) tuple.
///
/// The coordinate map is ordered (BTreeMap) so the JSON form is canonical and
/// the hash is stable regardless of construction order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpacePoint {
    coordinates: BTreeMap<String, String>,
}

impl DimensionSpacePoint {
    /// The empty point: the single variant of a dimensionless graph, and the
    /// origin of root node aggregates.
    pub fn empty() -> Self {
        Self {
            coordinates: BTreeMap::new(),
        }
    }

    pub fn from_coordinates(coordinates: BTreeMap<String, String>) -> Self {
        Self { coordinates }
    }

    /// Build a point from (dimension, coordinate) pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            coordinates: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn coordinates(&self) -> &BTreeMap<String, String> {
        &self.coordinates
    }

    pub fn coordinate(&self, dimension: &str) -> Option<&str> {
        self.coordinates.get(dimension).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Canonical JSON form, the hashing input and the storage representation
    /// in the `dimension_space_points` lookup table.
    pub fn to_json(&self) -> String {
        // BTreeMap serializes with sorted keys, so this is canonical.
        serde_json::to_string(&self.coordinates).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let coordinates: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(Self { coordinates })
    }

    /// Content-addressable hash of this point.
    pub fn hash(&self) -> DimensionSpacePointHash {
        DimensionSpacePointHash(blake3::hash(self.to_json().as_bytes()).to_hex().to_string())
    }
}

impl fmt::Display for DimensionSpacePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

/// A [`DimensionSpacePoint`] in the "authored-in" role: the variant a node
/// record was created in. Same value, different meaning; conversions are
/// explicit so the two roles do not silently mix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginDimensionSpacePoint(DimensionSpacePoint);

impl OriginDimensionSpacePoint {
    pub fn from_point(point: DimensionSpacePoint) -> Self {
        Self(point)
    }

    pub fn empty() -> Self {
        Self(DimensionSpacePoint::empty())
    }

    pub fn as_point(&self) -> &DimensionSpacePoint {
        &self.0
    }

    pub fn into_point(self) -> DimensionSpacePoint {
        self.0
    }

    pub fn hash(&self) -> DimensionSpacePointHash {
        self.0.hash()
    }

    pub fn to_json(&self) -> String {
        self.0.to_json()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        DimensionSpacePoint::from_json(json).map(Self)
    }
}

impl fmt::Display for OriginDimensionSpacePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl From<DimensionSpacePoint> for OriginDimensionSpacePoint {
    fn from(point: DimensionSpacePoint) -> Self {
        Self(point)
    }
}

impl From<OriginDimensionSpacePoint> for DimensionSpacePoint {
    fn from(origin: OriginDimensionSpacePoint) -> Self {
        origin.0
    }
}

/// A set of dimension space points, keyed by hash. Order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<DimensionSpacePoint>", into = "Vec<DimensionSpacePoint>")]
pub struct DimensionSpacePointSet {
    points: HashMap<DimensionSpacePointHash, DimensionSpacePoint>,
}

impl DimensionSpacePointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = DimensionSpacePoint>,
    {
        Self {
            points: points.into_iter().map(|p| (p.hash(), p)).collect(),
        }
    }

    pub fn insert(&mut self, point: DimensionSpacePoint) {
        self.points.insert(point.hash(), point);
    }

    pub fn contains(&self, point: &DimensionSpacePoint) -> bool {
        self.points.contains_key(&point.hash())
    }

    pub fn contains_hash(&self, hash: &DimensionSpacePointHash) -> bool {
        self.points.contains_key(hash)
    }

    pub fn get_by_hash(&self, hash: &DimensionSpacePointHash) -> Option<&DimensionSpacePoint> {
        self.points.get(hash)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DimensionSpacePoint> {
        self.points.values()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &DimensionSpacePointHash> {
        self.points.keys()
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut points = self.points.clone();
        points.extend(other.points.clone());
        Self { points }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            points: self
                .points
                .iter()
                .filter(|(hash, _)| other.points.contains_key(*hash))
                .map(|(hash, point)| (hash.clone(), point.clone()))
                .collect(),
        }
    }

    pub fn difference(&self, other: &Self) -> Self {
        Self {
            points: self
                .points
                .iter()
                .filter(|(hash, _)| !other.points.contains_key(*hash))
                .map(|(hash, point)| (hash.clone(), point.clone()))
                .collect(),
        }
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.points.keys().all(|hash| other.points.contains_key(hash))
    }
}

impl From<Vec<DimensionSpacePoint>> for DimensionSpacePointSet {
    fn from(points: Vec<DimensionSpacePoint>) -> Self {
        Self::from_points(points)
    }
}

impl From<DimensionSpacePointSet> for Vec<DimensionSpacePoint> {
    fn from(set: DimensionSpacePointSet) -> Self {
        set.points.into_values().collect()
    }
}

impl FromIterator<DimensionSpacePoint> for DimensionSpacePointSet {
    fn from_iter<I: IntoIterator<Item = DimensionSpacePoint>>(iter: I) -> Self {
        Self::from_points(iter)
    }
}

/// Derived index: which covered points fall back to each occupied origin of a
/// node aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageByOrigin {
    map: HashMap<OriginDimensionSpacePoint, DimensionSpacePointSet>,
}

impl CoverageByOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, origin: OriginDimensionSpacePoint, covered: DimensionSpacePoint) {
        self.map.entry(origin).or_default().insert(covered);
    }

    pub fn coverage_of(
        &self,
        origin: &OriginDimensionSpacePoint,
    ) -> Option<&DimensionSpacePointSet> {
        self.map.get(origin)
    }

    pub fn origins(&self) -> impl Iterator<Item = &OriginDimensionSpacePoint> {
        self.map.keys()
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&OriginDimensionSpacePoint, &DimensionSpacePointSet)> {
        self.map.iter()
    }

    /// Every origin must occupy at least one covered point: itself. A node
    /// always covers its own origin.
    pub fn every_origin_covers_itself(&self) -> bool {
        self.map
            .iter()
            .all(|(origin, covered)| covered.contains(origin.as_point()))
    }
}

/// Derived index, the inverse of [`CoverageByOrigin`]: for every covered
/// point, the single occupied origin it falls back to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginByCoverage {
    map: HashMap<DimensionSpacePointHash, OriginDimensionSpacePoint>,
}

impl OriginByCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `covered` resolves to `origin`. Returns `false` when the
    /// covered point is already claimed by a *different* origin, which breaks
    /// the "exactly one occupying origin per covered point" invariant.
    pub fn add(
        &mut self,
        covered: &DimensionSpacePoint,
        origin: OriginDimensionSpacePoint,
    ) -> bool {
        match self.map.get(&covered.hash()) {
            Some(existing) => *existing == origin,
            None => {
                self.map.insert(covered.hash(), origin);
                true
            }
        }
    }

    pub fn origin_of(&self, covered: &DimensionSpacePoint) -> Option<&OriginDimensionSpacePoint> {
        self.map.get(&covered.hash())
    }

    pub fn origin_of_hash(
        &self,
        hash: &DimensionSpacePointHash,
    ) -> Option<&OriginDimensionSpacePoint> {
        self.map.get(hash)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

//! Node Data Structures
//!
//! This module defines the identities and storage rows of the content graph:
//!
//! - [`NodeAggregateId`]: the logical identity of "the same thing across
//!   variants and versions" within one content stream.
//! - [`RelationAnchorPoint`]: the surrogate key of one materialized node row.
//!   Distinct from the aggregate id so the *same* row can be linked into
//!   multiple content streams until copy-on-write forks it.
//! - [`NodeRecord`]: one materialized variant of a node.
//! - [`NodeAggregate`]: the aggregate-level view assembled from rows and
//!   edges (occupied origins, covered points, fallback indexes).
//!
//! A node record carries no structural information; hierarchy lives entirely
//! on the edge table.

use crate::models::dimension::{
    CoverageByOrigin, DimensionSpacePointHash, DimensionSpacePointSet, OriginByCoverage,
    OriginDimensionSpacePoint,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for graph value types
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid node type name: {0}")]
    InvalidNodeTypeName(String),

    #[error("Invalid node name: {0}")]
    InvalidNodeName(String),

    #[error("Invalid subtree tag: {0}")]
    InvalidSubtreeTag(String),

    #[error("Invalid classification: {0}")]
    InvalidClassification(String),

    #[error("Properties must be a JSON object, got: {0}")]
    InvalidProperties(String),
}

/// Logical identity of a node across variants and versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAggregateId(String);

impl NodeAggregateId {
    /// Generate a fresh aggregate id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeAggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeAggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sentinel anchor used as the parent of root edges. Multiple disjoint roots
/// may coexist under it (a forest, not a single tree).
const ROOT_ANCHOR: &str = "00000000-0000-0000-0000-000000000000";

/// Surrogate key addressing one node row.
///
/// Not the aggregate id: several content streams may share one anchor until
/// copy-on-write gives the writing stream a private copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationAnchorPoint(String);

impl RelationAnchorPoint {
    /// Generate a fresh anchor.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The distinguished parent anchor of root edges.
    pub fn root_sentinel() -> Self {
        Self(ROOT_ANCHOR.to_string())
    }

    pub fn is_root_sentinel(&self) -> bool {
        self.0 == ROOT_ANCHOR
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RelationAnchorPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RelationAnchorPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a node aggregate participates in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeClassification {
    /// Top-level entry point; attached to the root sentinel edge.
    Root,
    /// Created automatically alongside its parent and always reachable via a
    /// named edge.
    Tethered,
    /// Everything else.
    Regular,
}

impl NodeClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Tethered => "tethered",
            Self::Regular => "regular",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "root" => Ok(Self::Root),
            "tethered" => Ok(Self::Tethered),
            "regular" => Ok(Self::Regular),
            other => Err(ValidationError::InvalidClassification(other.to_string())),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }

    pub fn is_tethered(&self) -> bool {
        matches!(self, Self::Tethered)
    }
}

/// Name of a node type, e.g. `Document` or `Site.Root`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTypeName(String);

impl NodeTypeName {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::InvalidNodeTypeName(value));
        }
        Ok(Self(value))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Edge name used for path resolution; lowercase with `-` and `_` allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidNodeName(value))
        }
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One materialized variant of a node: the `node` storage row.
///
/// Addressed by anchor. Created by event application, mutated only through
/// the copy-on-write engine, deleted only by garbage collection after stream
/// removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Surrogate key; may be shared by several content streams.
    pub anchor: RelationAnchorPoint,

    /// Logical identity across variants.
    pub aggregate_id: NodeAggregateId,

    /// The variant this row was authored in.
    pub origin: OriginDimensionSpacePoint,

    /// Hash of `origin`, kept denormalized for joins against edges.
    pub origin_hash: DimensionSpacePointHash,

    /// Node type name.
    pub node_type: NodeTypeName,

    /// Root / tethered / regular.
    pub classification: NodeClassification,

    /// Optional node name (mirrored onto edges for path resolution).
    pub name: Option<NodeName>,

    /// Serialized property bag (always a JSON object).
    pub properties: serde_json::Value,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp.
    pub modified_at: DateTime<Utc>,
}

impl NodeRecord {
    /// Create a record under a fresh anchor.
    pub fn new(
        aggregate_id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
        node_type: NodeTypeName,
        classification: NodeClassification,
        name: Option<NodeName>,
        properties: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let origin_hash = origin.hash();
        Self {
            anchor: RelationAnchorPoint::new(),
            aggregate_id,
            origin,
            origin_hash,
            node_type,
            classification,
            name,
            properties,
            created_at: now,
            modified_at: now,
        }
    }

    /// Clone this record under a fresh anchor (the copy-on-write fork).
    pub fn fork(&self) -> Self {
        let mut copy = self.clone();
        copy.anchor = RelationAnchorPoint::new();
        copy
    }

    /// Replace the origin, keeping the denormalized hash in sync.
    pub fn set_origin(&mut self, origin: OriginDimensionSpacePoint) {
        self.origin_hash = origin.hash();
        self.origin = origin;
    }

    /// Merge a property diff into the bag: `null` removes a key, any other
    /// value sets it.
    pub fn merge_properties(&mut self, values: &serde_json::Value) {
        if let (Some(bag), Some(diff)) = (self.properties.as_object_mut(), values.as_object()) {
            for (key, value) in diff {
                if value.is_null() {
                    bag.remove(key);
                } else {
                    bag.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Aggregate-level view of a node: every origin it occupies, every point it
/// covers, and the fallback indexes between them, within one content stream.
///
/// Assembled from rows and edges by the query engine; never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAggregate {
    pub aggregate_id: NodeAggregateId,
    pub classification: NodeClassification,
    pub node_type: NodeTypeName,
    pub name: Option<NodeName>,
    /// Origins this aggregate occupies (one node row each).
    pub occupied_origins: Vec<OriginDimensionSpacePoint>,
    /// All dimension points the aggregate is visible at.
    pub covered_dimension_space_points: DimensionSpacePointSet,
    /// For every occupied origin, which covered points fall back to it.
    pub coverage_by_origin: CoverageByOrigin,
    /// The inverse mapping.
    pub origin_by_coverage: OriginByCoverage,
}

impl NodeAggregate {
    pub fn occupies(&self, origin: &OriginDimensionSpacePoint) -> bool {
        self.occupied_origins.contains(origin)
    }

    pub fn covers_hash(&self, hash: &DimensionSpacePointHash) -> bool {
        self.covered_dimension_space_points.contains_hash(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dimension::DimensionSpacePoint;
    use serde_json::json;

    #[test]
    fn fork_gets_fresh_anchor() {
        let record = NodeRecord::new(
            NodeAggregateId::new(),
            OriginDimensionSpacePoint::from_point(DimensionSpacePoint::from_pairs([(
                "language", "en",
            )])),
            NodeTypeName::from_string("Document"),
            NodeClassification::Regular,
            None,
            json!({}),
        );

        let copy = record.fork();
        assert_ne!(copy.anchor, record.anchor);
        assert_eq!(copy.aggregate_id, record.aggregate_id);
        assert_eq!(copy.origin, record.origin);
        assert_eq!(copy.properties, record.properties);
    }

    #[test]
    fn merge_properties_sets_and_removes() {
        let mut record = NodeRecord::new(
            NodeAggregateId::new(),
            OriginDimensionSpacePoint::empty(),
            NodeTypeName::from_string("Document"),
            NodeClassification::Regular,
            None,
            json!({"title": "old", "stale": true}),
        );

        record.merge_properties(&json!({"title": "new", "stale": null, "fresh": 1}));

        assert_eq!(record.properties, json!({"title": "new", "fresh": 1}));
    }

    #[test]
    fn set_origin_keeps_hash_in_sync() {
        let mut record = NodeRecord::new(
            NodeAggregateId::new(),
            OriginDimensionSpacePoint::empty(),
            NodeTypeName::from_string("Document"),
            NodeClassification::Regular,
            None,
            json!({}),
        );

        let de = OriginDimensionSpacePoint::from_point(DimensionSpacePoint::from_pairs([(
            "language", "de",
        )]));
        record.set_origin(de.clone());
        assert_eq!(record.origin_hash, de.hash());
    }

    #[test]
    fn classification_round_trip() {
        for c in [
            NodeClassification::Root,
            NodeClassification::Tethered,
            NodeClassification::Regular,
        ] {
            assert_eq!(NodeClassification::parse(c.as_str()).unwrap(), c);
        }
        assert!(NodeClassification::parse("bogus").is_err());
    }

    #[test]
    fn node_name_validation() {
        assert!(NodeName::new("main").is_ok());
        assert!(NodeName::new("a-b_c2").is_ok());
        assert!(NodeName::new("").is_err());
        assert!(NodeName::new("Main").is_err());
    }
}

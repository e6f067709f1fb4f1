//! Relation Rows
//!
//! The two edge tables of the graph store. All structure lives here:
//! "children of X" always means "hierarchy relations whose parent anchor is
//! X's anchor in this exact (stream, dimension hash) pair".

use crate::models::dimension::DimensionSpacePointHash;
use crate::models::node::{NodeAggregateId, NodeName, RelationAnchorPoint};
use crate::models::stream::ContentStreamId;
use crate::models::tags::SubtreeTags;
use serde::{Deserialize, Serialize};

/// One parent/child edge, scoped to a content stream and a dimension point.
///
/// Uniqueness: within one (stream, dimension hash) a child anchor has at most
/// one incoming edge; within one (stream, dimension hash, parent anchor)
/// sibling positions are pairwise distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyRelation {
    pub parent_anchor: RelationAnchorPoint,
    pub child_anchor: RelationAnchorPoint,
    pub content_stream_id: ContentStreamId,
    pub dimension_space_point_hash: DimensionSpacePointHash,
    /// Sparse sibling position; gaps let inserts reuse midpoints.
    pub position: i64,
    /// Explicit plus inherited subtree tags.
    pub subtree_tags: SubtreeTags,
    /// Optional edge name for path resolution.
    pub name: Option<NodeName>,
}

impl HierarchyRelation {
    /// Whether this edge attaches a root node to the root sentinel.
    pub fn is_root_relation(&self) -> bool {
        self.parent_anchor.is_root_sentinel()
    }
}

/// One ordered reference from a node row to a target aggregate.
///
/// Reference rows are anchor-scoped, not stream-scoped: sharing happens via
/// the anchor, and copy-on-write duplicates them explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRelation {
    pub source_anchor: RelationAnchorPoint,
    pub name: String,
    /// Ordinal position within (source anchor, name).
    pub position: i64,
    pub target_aggregate_id: NodeAggregateId,
    /// Optional properties attached to the reference itself.
    pub properties: Option<serde_json::Value>,
}

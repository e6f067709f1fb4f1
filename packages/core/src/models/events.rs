//! Graph Mutation Events
//!
//! The typed events delivered by the external event store. Each event is
//! wrapped in an [`EventEnvelope`] carrying its sequence number and
//! timestamps. The projector consumes these with a single exhaustive match:
//! adding a variant forces every handler to be updated.
//!
//! The event store itself, and the command/validation layer that decides
//! which events to emit, live outside this crate.

use crate::models::dimension::{
    DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint,
};
use crate::models::node::{NodeAggregateId, NodeClassification, NodeName, NodeTypeName};
use crate::models::stream::ContentStreamId;
use crate::models::tags::SubtreeTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One target of a [`GraphEvent::NodeReferencesSet`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTarget {
    pub target_aggregate_id: NodeAggregateId,
    /// Optional properties attached to the reference itself.
    pub properties: Option<serde_json::Value>,
}

/// The closed set of mutation events this engine projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GraphEvent {
    /// A root node aggregate was created, covering the given dimension
    /// points. Roots are authored in the empty origin.
    RootNodeAggregateCreated {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        node_type: NodeTypeName,
        coverage: DimensionSpacePointSet,
    },

    /// A regular or tethered node aggregate was created below a parent.
    NodeAggregateCreated {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        node_type: NodeTypeName,
        origin: OriginDimensionSpacePoint,
        /// Points the new node is visible at; must be covered by the parent.
        coverage: DimensionSpacePointSet,
        parent_node_aggregate_id: NodeAggregateId,
        node_name: Option<NodeName>,
        /// Sibling to insert before; end of the list when absent.
        succeeding_sibling_id: Option<NodeAggregateId>,
        initial_properties: serde_json::Value,
        classification: NodeClassification,
    },

    /// Properties were set (or removed, via null) on one origin variant.
    NodePropertiesSet {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
        property_values: serde_json::Value,
    },

    /// A node aggregate was re-parented and/or re-ordered in the given
    /// dimension points.
    NodeAggregateMoved {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        affected_dimension_space_points: DimensionSpacePointSet,
        /// New parent; keep the current parent when absent.
        new_parent_id: Option<NodeAggregateId>,
        /// Sibling to insert before; end of the list when absent.
        new_succeeding_sibling_id: Option<NodeAggregateId>,
    },

    /// The ordered reference list under (source, name) was replaced.
    NodeReferencesSet {
        content_stream_id: ContentStreamId,
        source_aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        reference_name: String,
        targets: Vec<ReferenceTarget>,
    },

    /// A tag was added to a node; descendants inherit it.
    SubtreeTagged {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        tag: SubtreeTag,
    },

    /// An explicit tag was removed; descendant inheritance is recomputed.
    SubtreeUntagged {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        tag: SubtreeTag,
    },

    /// The node aggregate's name changed across all its variants.
    NodeAggregateRenamed {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        new_name: NodeName,
    },

    /// The node aggregate's type changed across all its variants.
    NodeAggregateTypeChanged {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        new_node_type: NodeTypeName,
    },

    /// The aggregate's subtrees were detached in the given dimension points.
    /// Node rows linger until stream-removal garbage collection.
    NodeAggregateRemoved {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        affected_coverage: DimensionSpacePointSet,
    },

    /// A dimension point's coordinate identity changed: edges are re-hashed
    /// and origins rewritten from source to target.
    DimensionSpacePointMoved {
        content_stream_id: ContentStreamId,
        source: DimensionSpacePoint,
        target: DimensionSpacePoint,
    },

    /// A new dimension point was added that falls back to an existing one:
    /// edges are duplicated at the target, node rows untouched.
    DimensionShineThroughAdded {
        content_stream_id: ContentStreamId,
        source: DimensionSpacePoint,
        target: DimensionSpacePoint,
    },

    /// A new version line was forked; only hierarchy edges are copied.
    ContentStreamForked {
        source_content_stream_id: ContentStreamId,
        new_content_stream_id: ContentStreamId,
    },

    /// A version line was discarded; its edges are deleted and orphaned
    /// node/reference rows garbage-collected.
    ContentStreamRemoved {
        content_stream_id: ContentStreamId,
    },
}

impl GraphEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RootNodeAggregateCreated { .. } => "root-node-aggregate-created",
            Self::NodeAggregateCreated { .. } => "node-aggregate-created",
            Self::NodePropertiesSet { .. } => "node-properties-set",
            Self::NodeAggregateMoved { .. } => "node-aggregate-moved",
            Self::NodeReferencesSet { .. } => "node-references-set",
            Self::SubtreeTagged { .. } => "subtree-tagged",
            Self::SubtreeUntagged { .. } => "subtree-untagged",
            Self::NodeAggregateRenamed { .. } => "node-aggregate-renamed",
            Self::NodeAggregateTypeChanged { .. } => "node-aggregate-type-changed",
            Self::NodeAggregateRemoved { .. } => "node-aggregate-removed",
            Self::DimensionSpacePointMoved { .. } => "dimension-space-point-moved",
            Self::DimensionShineThroughAdded { .. } => "dimension-shine-through-added",
            Self::ContentStreamForked { .. } => "content-stream-forked",
            Self::ContentStreamRemoved { .. } => "content-stream-removed",
        }
    }
}

/// Envelope wrapping one event as delivered by the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Position in the event log; the projection checkpoint advances to this
    /// value when the event's effects commit.
    pub sequence_number: i64,
    /// When the event store recorded the event.
    pub recorded_at: DateTime<Utc>,
    /// When the initiating command was issued, if known.
    pub initiated_at: Option<DateTime<Utc>>,
    pub event: GraphEvent,
}

impl EventEnvelope {
    pub fn new(sequence_number: i64, event: GraphEvent) -> Self {
        Self {
            sequence_number,
            recorded_at: Utc::now(),
            initiated_at: None,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serde_is_tagged() {
        let event = GraphEvent::ContentStreamForked {
            source_content_stream_id: ContentStreamId::from_string("s1"),
            new_content_stream_id: ContentStreamId::from_string("s2"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get("type").unwrap(), "ContentStreamForked");

        let restored: GraphEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn envelope_round_trip() {
        let envelope = EventEnvelope::new(
            7,
            GraphEvent::ContentStreamRemoved {
                content_stream_id: ContentStreamId::from_string("s1"),
            },
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let restored: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.sequence_number, 7);
        assert_eq!(restored.event, envelope.event);
    }
}

//! Projection Error Types

use crate::db::error::DatabaseError;
use crate::models::dimension::DimensionSpacePointHash;
use crate::models::node::{NodeAggregateId, RelationAnchorPoint};
use crate::models::stream::ContentStreamId;
use thiserror::Error;

/// Errors raised while applying events to the graph.
///
/// Any error aborts the surrounding transaction; the event's effects are
/// rolled back as a whole and the checkpoint does not advance.
#[derive(Error, Debug)]
pub enum ProjectionError {
    /// An event referenced an aggregate that has no anchor in the addressed
    /// subgraph.
    #[error("Node aggregate {aggregate_id} has no anchor in stream {content_stream_id} at {dimension_space_point_hash}")]
    MissingAnchor {
        aggregate_id: NodeAggregateId,
        content_stream_id: ContentStreamId,
        dimension_space_point_hash: DimensionSpacePointHash,
    },

    /// An anchor referenced by an edge has no node row.
    #[error("No node row for anchor {0}")]
    AnchorNotFound(RelationAnchorPoint),

    /// An event referenced an aggregate with no node rows at all.
    #[error("Node aggregate not found: {0}")]
    NodeNotFound(NodeAggregateId),

    /// An event referenced an unknown content stream.
    #[error("Content stream not found: {0}")]
    StreamNotFound(ContentStreamId),

    /// The event sequence skipped ahead of the checkpoint.
    #[error("Checkpoint gap: expected sequence {expected}, got {actual}")]
    CheckpointGap { expected: i64, actual: i64 },

    /// An event's payload is not applicable to the current graph state.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Storage failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Payload (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProjectionError {
    pub fn missing_anchor(
        aggregate_id: NodeAggregateId,
        content_stream_id: ContentStreamId,
        dimension_space_point_hash: DimensionSpacePointHash,
    ) -> Self {
        Self::MissingAnchor {
            aggregate_id,
            content_stream_id,
            dimension_space_point_hash,
        }
    }

    pub fn invalid_event(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }
}

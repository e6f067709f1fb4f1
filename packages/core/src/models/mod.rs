//! Graph Value Types
//!
//! Data structures shared by the storage, projection and query layers:
//!
//! - [`dimension`] - points and point sets in the variation space
//! - [`tags`] - explicit and inherited subtree tags
//! - [`node`] - node identities, records and aggregates
//! - [`relation`] - hierarchy and reference edge rows
//! - [`stream`] - content streams and workspaces
//! - [`events`] - the projected event enum and its envelope

pub mod dimension;
pub mod events;
pub mod node;
pub mod relation;
pub mod stream;
pub mod tags;

pub use dimension::{
    CoverageByOrigin, DimensionSpacePoint, DimensionSpacePointHash, DimensionSpacePointSet,
    OriginByCoverage, OriginDimensionSpacePoint,
};
pub use events::{EventEnvelope, GraphEvent, ReferenceTarget};
pub use node::{
    NodeAggregate, NodeAggregateId, NodeClassification, NodeName, NodeRecord, NodeTypeName,
    RelationAnchorPoint, ValidationError,
};
pub use relation::{HierarchyRelation, ReferenceRelation};
pub use stream::{
    ContentStream, ContentStreamId, ContentStreamStatus, Workspace, WorkspaceName,
};
pub use tags::{SubtreeTag, SubtreeTags};

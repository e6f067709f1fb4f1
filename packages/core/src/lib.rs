//! # ContentGraph Core
//!
//! An event-projected, multi-dimensional content graph engine: a tree of
//! nodes that varies along named dimensions (language, region, ...) and
//! along version lines (content streams), stored relationally and queried
//! per (stream, dimension point) subgraph.
//!
//! ## Architecture
//!
//! - **Event-sourced**: an external event store delivers a totally ordered
//!   log; the [`projection::GraphProjector`] applies each event in its own
//!   transaction and advances a checkpoint with it.
//! - **Copy-on-write versioning**: forking a content stream copies hierarchy
//!   edges only. Node and reference rows stay shared via anchors until a
//!   write forks them ([`projection::CopyOnWriteEngine`]).
//! - **Dimension variation**: every hierarchy edge is keyed by the hash of a
//!   dimension space point; one logical node can materialize differently per
//!   variant ([`models::dimension`]).
//! - **Tag-based visibility**: subtree tags are materialized with their
//!   inheritance on every edge, so reads filter per edge
//!   ([`query::VisibilityConstraints`]).
//!
//! ## Module layout
//!
//! - [`models`]: value types shared by all layers
//! - [`db`]: libsql connection management, schema and the row store
//! - [`projection`]: the write side, driven by events
//! - [`query`]: the read side, subgraph traversal operations
//! - [`integrity`]: offline structural validation

pub mod db;
pub mod integrity;
pub mod models;
pub mod projection;
pub mod query;

pub use db::{DatabaseError, DatabaseService, GraphStore};
pub use integrity::{IntegrityChecker, IntegrityViolation};
pub use models::{
    ContentStream, ContentStreamId, ContentStreamStatus, DimensionSpacePoint,
    DimensionSpacePointHash, DimensionSpacePointSet, EventEnvelope, GraphEvent, HierarchyRelation,
    NodeAggregate, NodeAggregateId, NodeClassification, NodeName, NodeRecord, NodeTypeName,
    OriginDimensionSpacePoint, ReferenceRelation, ReferenceTarget, RelationAnchorPoint,
    SubtreeTag, SubtreeTags, ValidationError, Workspace, WorkspaceName,
};
pub use projection::{GraphProjector, ProjectionError};
pub use query::{ContentGraph, ContentSubgraph, Node, QueryError, Subtree, VisibilityConstraints};

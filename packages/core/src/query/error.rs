//! Query Error Types

use crate::db::error::DatabaseError;
use crate::models::node::NodeTypeName;
use thiserror::Error;

/// Errors raised by the read side.
#[derive(Error, Debug)]
pub enum QueryError {
    /// More than one root aggregate carries the requested type.
    #[error("Found {count} root node aggregates of type {node_type}, expected at most one")]
    AmbiguousRootAggregate { node_type: NodeTypeName, count: usize },

    /// Storage failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

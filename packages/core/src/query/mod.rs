//! Query Layer
//!
//! Read-side access to the projected graph. Everything is addressed through
//! a [`ContentSubgraph`]: the tree visible at one (content stream, dimension
//! point) pair under a set of [`VisibilityConstraints`].

pub mod error;
pub mod subgraph;

pub use error::QueryError;
pub use subgraph::{ContentGraph, ContentSubgraph, Node, Subtree, VisibilityConstraints};

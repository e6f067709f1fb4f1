//! Database Layer
//!
//! Connection management, schema and the row-level graph store.
//!
//! # Components
//!
//! - [`DatabaseService`]: libsql connection management and idempotent schema
//! - [`GraphStore`]: row operations over the graph tables, bound to one
//!   connection so transactions can wrap a whole event application
//! - [`DatabaseError`]: error types for this layer

pub mod database;
pub mod error;
pub mod graph_store;

pub use database::DatabaseService;
pub use error::DatabaseError;
pub use graph_store::GraphStore;

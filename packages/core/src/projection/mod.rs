//! Projection Layer
//!
//! Turns the event log into graph rows. The projector is the single writer;
//! each event is applied in its own transaction together with the checkpoint
//! advance, so the graph is always consistent with some prefix of the log.
//!
//! # Components
//!
//! - [`GraphProjector`]: the event handlers
//! - [`CopyOnWriteEngine`]: forks shared node rows before mutation
//! - [`DimensionAdjustmentEngine`]: dimension point moves and shine-through
//! - [`ordering`]: sparse sibling positions with midpoint insertion
//! - [`ProjectionError`]: error types for this layer

pub mod copy_on_write;
pub mod dimension_adjustment;
pub mod error;
pub mod ordering;
pub mod projector;

pub use copy_on_write::CopyOnWriteEngine;
pub use dimension_adjustment::DimensionAdjustmentEngine;
pub use error::ProjectionError;
pub use ordering::{assign_position, PositionAssignment, DEFAULT_POSITION_GAP};
pub use projector::GraphProjector;

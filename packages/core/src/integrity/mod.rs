//! Integrity Checking
//!
//! Offline validation of the projected graph's structural invariants.
//! Findings are reported, never auto-repaired.

pub mod checker;

pub use checker::{IntegrityChecker, IntegrityViolation};

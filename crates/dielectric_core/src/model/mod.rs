//! Document schemas for the dielectric build.
//!
//! # Responsibility
//! - Define explicit shapes for material, task and derived-record documents.
//! - Reject malformed documents at decode time rather than at point of use.
//!
//! # Invariants
//! - `material_id` links a material to at most one derived record.
//! - Timestamps are Unix epoch milliseconds.

pub mod dielectric;
pub mod material;
pub mod task;

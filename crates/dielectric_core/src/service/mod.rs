//! Build services.
//!
//! # Responsibility
//! - Select the dielectric task of a material (`task_selector`).
//! - Orchestrate change detection, computation and upsert
//!   (`dielectric_builder`).
//!
//! # Invariants
//! - Services talk to storage only through repository traits.

pub mod dielectric_builder;
pub mod task_selector;

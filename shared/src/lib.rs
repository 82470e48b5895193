//! Shared types and models for the Metal Recovery Platform
//!
//! This crate contains the domain vocabulary shared between the backend
//! services and any reporting or import tooling built on top of them.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;

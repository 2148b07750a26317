//! Cost optimization control plane
//!
//! This crate provides the core functionality for:
//! - Resource scoring across rightsizing, spot, scheduling and cost vectors
//! - Risk-tiered decision routing with caching and cascade
//! - An idempotent action ledger with crash recovery
//! - The observe-orient-decide-act controller loop
//! - Outcome learning, token/cost tracking and observability

pub mod adapter;
pub mod cache;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod learning;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod ooda;
pub mod router;
pub mod scoring;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::OptimizerConfig;
pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
pub use ooda::{Controller, CycleReport, CycleSummary, RecoveryReport};

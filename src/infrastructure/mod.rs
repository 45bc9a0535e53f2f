//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - The protocol engine seam and the loopback engine
//! - Metrics recorders

pub mod engine;
pub mod telemetry;

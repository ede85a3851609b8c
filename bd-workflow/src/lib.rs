//! bd-workflow library
//!
//! Coordination bridge between tracked issues and multi-step agent workflows.

pub mod agents;
pub mod analytics;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod state;
pub mod templates;

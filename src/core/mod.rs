//! Core engine logic — types, graph building, resolution, reconciliation, execution.

pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod journal;
pub mod reconciler;
pub mod resolver;
pub mod state;
pub mod types;

//! Duplicate-vertex detection and repair for property graphs.
//!
//! The engine groups vertices by their schema key properties, picks a keeper
//! per group with a topology-based tie-break, confirms the decision with a
//! second time-separated scan, and only then deletes the other members.

#![warn(missing_docs)]

pub mod config;
pub mod dedupe;
pub mod model;
pub mod schema;
pub mod store;
pub mod types;

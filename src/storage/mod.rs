//! Storage functionality for relcache
//!
//! This module provides the SQLite-backed relational store: the
//! wipe-and-reload rebuilder and the dynamic join query executor.

pub mod query;
pub mod store;

// Re-export main types
pub use store::{CacheStore, JOIN_TABLE};

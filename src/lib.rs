//! # relcache
//!
//! A refresh-on-demand cache in front of a single remote JSON data source.
//! Fetched flat records are normalized into a small relational SQLite store
//! (one table per schema entity plus a synthetic positional join table) and
//! served through ad-hoc filtered/searched join queries, with TTL-based
//! staleness detection triggering background rebuilds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relcache::{CacheService, CacheStore, HttpSource, TableSchema};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CacheStore::open("cache.db")?;
//!     let source = Arc::new(HttpSource::new("http://example.com", "/records")?);
//!     let service = CacheService::new(store, source, Duration::from_secs(3600))?;
//!
//!     // Push a schema and rebuild the store from the remote source
//!     let schema = TableSchema::from_value(&serde_json::json!({
//!         "users": ["user_id", "username"],
//!     }))?;
//!     let counts = service.rebuild_sync(Some(schema)).await?;
//!     println!("recorded {} user rows", counts["users"]);
//!
//!     // Query with an equality filter
//!     let filters = HashMap::from([("username".to_string(), "ann".to_string())]);
//!     let rows = service.query(&filters, None).await?;
//!     println!("{} matching rows", rows.len());
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod grouper;
pub mod schema;
pub mod server;
pub mod storage;

// Re-export main API types
pub use config::Config;
pub use error::{CacheError, Result};
pub use fetch::{HttpSource, RecordSource, RemoteSourceError};
pub use freshness::{CacheService, CacheState};
pub use schema::{TableSchema, sanitize_identifier};
pub use storage::CacheStore;

// Re-export commonly used types
pub use grouper::{JsonMap, Row, RowSet, group_records};

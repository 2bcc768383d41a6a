//! Freshness tracking and rebuild arbitration
//!
//! [`CacheState`] is the single shared-state object of the engine: the
//! in-flight-rebuild flag, the last successful rebuild time and the active
//! schema. [`CacheService`] composes it with the store and the record
//! source into the facade the HTTP layer talks to.
//!
//! Flag discipline: at most one rebuild is ever in flight. The flag is won
//! by compare-and-swap before any awaited I/O of the pipeline and cleared
//! when the pipeline finishes, successfully or not, so a failed rebuild can
//! never leave the store permanently "rebuilding". Readers and further
//! updates observing the flag are rejected, never queued.

use crate::error::{CacheError, Result};
use crate::fetch::RecordSource;
use crate::grouper::{JsonMap, group_records};
use crate::schema::TableSchema;
use crate::storage::CacheStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Process-wide freshness and schema state, owned by the service and
/// mutated only by the rebuild pipeline
#[derive(Debug, Default)]
pub struct CacheState {
    rebuilding: AtomicBool,
    last_updated: Mutex<Option<DateTime<Utc>>>,
    schema: Mutex<Option<TableSchema>>,
}

impl CacheState {
    /// Try to win the in-flight-rebuild flag. Returns false when a rebuild
    /// already holds it.
    fn begin_rebuild(&self) -> bool {
        self.rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the flag; stamp the rebuild time on success.
    fn end_rebuild(&self, success: bool) {
        if success {
            *lock(&self.last_updated) = Some(Utc::now());
        }
        self.rebuilding.store(false, Ordering::Release);
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    /// Stale when never rebuilt, or when the elapsed time since the last
    /// successful rebuild exceeds `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match *lock(&self.last_updated) {
            None => true,
            Some(last) => {
                let ttl = ChronoDuration::seconds(ttl.as_secs().min(i64::MAX as u64) as i64);
                Utc::now().signed_duration_since(last) > ttl
            }
        }
    }

    /// The active schema, if an update has pushed one.
    pub fn schema(&self) -> Option<TableSchema> {
        lock(&self.schema).clone()
    }

    fn set_schema(&self, schema: TableSchema) {
        *lock(&self.schema) = Some(schema);
    }

    fn set_last_updated(&self, stamp: Option<DateTime<Utc>>) {
        *lock(&self.last_updated) = stamp;
    }
}

/// Lock a state mutex, recovering the value if a panicking thread poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The cache engine facade: freshness arbitration in front of the fetch,
/// normalize and rebuild pipeline and the join query executor
#[derive(Clone)]
pub struct CacheService {
    state: Arc<CacheState>,
    store: Arc<tokio::sync::Mutex<CacheStore>>,
    source: Arc<dyn RecordSource>,
    ttl: Duration,
}

impl CacheService {
    /// Wrap a store and record source. Restores the last rebuild time from
    /// the store's metadata so a restarted process does not look
    /// freshly-rebuilt; the schema itself is not persisted and starts empty.
    pub fn new(store: CacheStore, source: Arc<dyn RecordSource>, ttl: Duration) -> Result<Self> {
        let state = CacheState::default();
        state.set_last_updated(store.last_updated()?);

        Ok(Self {
            state: Arc::new(state),
            store: Arc::new(tokio::sync::Mutex::new(store)),
            source,
            ttl,
        })
    }

    pub fn is_rebuilding(&self) -> bool {
        self.state.is_rebuilding()
    }

    pub fn is_stale(&self) -> bool {
        self.state.is_stale(self.ttl)
    }

    /// The active schema, if an update has pushed one.
    pub fn schema(&self) -> Option<TableSchema> {
        self.state.schema()
    }

    /// Run the rebuild pipeline inline, blocking the caller.
    ///
    /// When `schema` is given it is sanitized and replaces the active schema
    /// wholesale; otherwise the current schema is reused. Rejects with
    /// `RebuildInProgress` when another rebuild holds the flag. Returns the
    /// per-entity inserted row counts.
    pub async fn rebuild_sync(
        &self,
        schema: Option<TableSchema>,
    ) -> Result<HashMap<String, usize>> {
        // Validation happens before the flag is touched; a malformed schema
        // must not flip the store into "rebuilding".
        let (schema, replaces_schema) = match schema {
            Some(schema) => (schema.sanitized()?, true),
            None => (
                self.state.schema().ok_or_else(|| {
                    CacheError::InvalidSchema("no schema has been configured".to_string())
                })?,
                false,
            ),
        };

        if !self.state.begin_rebuild() {
            return Err(CacheError::RebuildInProgress);
        }
        // Commit the replacement only once this update owns the rebuild; a
        // rejected update leaves the active schema untouched.
        if replaces_schema {
            self.state.set_schema(schema.clone());
        }
        let result = self.run_pipeline(&schema).await;
        self.state.end_rebuild(result.is_ok());
        result
    }

    /// Kick off a detached background rebuild with the current schema.
    ///
    /// Fire-and-forget: the outcome is observable only through the state
    /// flags; failures are logged. No-op when a rebuild is already in
    /// flight or when no schema has been pushed yet.
    pub fn trigger_rebuild_async(&self) {
        let Some(schema) = self.state.schema() else {
            log::debug!("skipping background refresh: no schema configured");
            return;
        };
        if !self.state.begin_rebuild() {
            return;
        }

        log::info!("cache stale, starting background rebuild");
        let service = self.clone();
        tokio::spawn(async move {
            let result = service.run_pipeline(&schema).await;
            match &result {
                Ok(counts) => log::info!(
                    "background rebuild finished: {} rows",
                    counts.values().sum::<usize>()
                ),
                Err(err) => log::error!("background rebuild failed: {err}"),
            }
            service.state.end_rebuild(result.is_ok());
        });
    }

    /// fetch -> group -> rebuild. The caller holds the rebuild flag.
    async fn run_pipeline(&self, schema: &TableSchema) -> Result<HashMap<String, usize>> {
        let records = self.source.fetch_records().await?;
        let grouped = group_records(&records, schema);
        let mut store = self.store.lock().await;
        store.rebuild(schema, &grouped)
    }

    /// Execute the filtered/searched join query against the store.
    ///
    /// Rejected with `RebuildInProgress` while a rebuild is in flight. With
    /// no schema pushed yet, returns no rows.
    pub async fn query(
        &self,
        filters: &HashMap<String, String>,
        search: Option<&str>,
    ) -> Result<Vec<JsonMap>> {
        if self.state.is_rebuilding() {
            return Err(CacheError::RebuildInProgress);
        }
        let Some(schema) = self.state.schema() else {
            return Ok(Vec::new());
        };

        let store = self.store.lock().await;
        store.query(&schema, filters, search)
    }
}

//! SQLite-backed relational store
//!
//! Holds one TEXT table per schema entity, the synthetic `main_table`
//! correlating one row per entity by position, and a small metadata table
//! stamping the last successful rebuild. Rebuilds are full wipe-and-reload,
//! always inside a single transaction.

use crate::error::{CacheError, Result};
use crate::grouper::{Row, RowSet};
use crate::schema::TableSchema;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;
use std::path::Path;

/// Name of the synthetic join table. A schema entity with the same
/// (sanitized) name would collide; accepted limitation.
pub const JOIN_TABLE: &str = "main_table";

/// Name of the key/value metadata table, recreated on every rebuild
const METADATA_TABLE: &str = "_cache_metadata";

/// Metadata key under which the rebuild timestamp is stored
const LAST_UPDATED_KEY: &str = "last_updated";

/// Database connection and rebuild/query operations
pub struct CacheStore {
    pub(crate) conn: Connection,
}

impl CacheStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CacheError::Storage(format!("failed to open database: {e}")))?;
        Ok(Self { conn })
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CacheError::Storage(format!("failed to create in-memory database: {e}")))?;
        Ok(Self { conn })
    }

    /// Wipe and repopulate the store from a sanitized schema and its
    /// normalized row sets. Returns the inserted row count per entity.
    ///
    /// Runs as one transaction: dropping every existing user table, creating
    /// and filling one table per entity, building the positional join table
    /// and stamping the metadata record. Any failure rolls everything back.
    ///
    /// `schema` must already have passed [`TableSchema::sanitized`]; table
    /// and column names are interpolated into statement text here.
    pub fn rebuild(
        &mut self,
        schema: &TableSchema,
        rows_by_table: &HashMap<String, RowSet>,
    ) -> Result<HashMap<String, usize>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| CacheError::Storage(format!("failed to start transaction: {e}")))?;

        // Full wipe: the prior schema's tables are not preserved. Names
        // starting with "sqlite_" are SQLite-internal and cannot be dropped.
        let existing: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT name FROM sqlite_master WHERE type='table'")
                .map_err(|e| CacheError::Storage(format!("failed to list tables: {e}")))?;
            let names = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| CacheError::Storage(format!("failed to list tables: {e}")))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(|e| CacheError::Storage(format!("failed to list tables: {e}")))?;
            names
        };
        for table in existing.iter().filter(|name| !name.starts_with("sqlite_")) {
            tx.execute(&format!("DROP TABLE IF EXISTS {table}"), [])
                .map_err(|e| CacheError::Storage(format!("failed to drop table {table}: {e}")))?;
        }

        // One TEXT table per entity, filled from its row set.
        let mut counts = HashMap::new();
        for table in schema.tables() {
            let columns_definition = table
                .columns
                .iter()
                .map(|c| format!("{c} TEXT"))
                .collect::<Vec<_>>()
                .join(", ");
            tx.execute(
                &format!("CREATE TABLE {} ({columns_definition})", table.name),
                [],
            )
            .map_err(|e| {
                CacheError::Storage(format!("failed to create table {}: {e}", table.name))
            })?;

            let mut inserted = 0usize;
            if let Some(rows) = rows_by_table.get(&table.name) {
                let placeholders = vec!["?"; table.columns.len()].join(", ");
                let mut stmt = tx
                    .prepare(&format!(
                        "INSERT INTO {} ({}) VALUES ({placeholders})",
                        table.name,
                        table.columns.join(", ")
                    ))
                    .map_err(|e| {
                        CacheError::Storage(format!("failed to prepare insert: {e}"))
                    })?;
                for row in rows {
                    stmt.execute(params_from_iter(row.iter())).map_err(|e| {
                        CacheError::Storage(format!(
                            "failed to insert row into {}: {e}",
                            table.name
                        ))
                    })?;
                    inserted += 1;
                }
            }
            counts.insert(table.name.clone(), inserted);
        }

        // Synthetic join table: one column per entity, one row per positional
        // tuple-group, carrying each entity's primary-key value.
        if !schema.is_empty() {
            let fk_columns: Vec<String> = schema
                .tables()
                .iter()
                .map(|t| format!("{}_{}", t.name, t.primary_key()))
                .collect();
            let definition = fk_columns
                .iter()
                .map(|c| format!("{c} TEXT"))
                .collect::<Vec<_>>()
                .join(", ");
            tx.execute(&format!("CREATE TABLE {JOIN_TABLE} ({definition})"), [])
                .map_err(|e| {
                    CacheError::Storage(format!("failed to create join table: {e}"))
                })?;

            let row_sets: Vec<Vec<&Row>> = schema
                .tables()
                .iter()
                .map(|t| {
                    rows_by_table
                        .get(&t.name)
                        .map(|rows| rows.iter().collect())
                        .unwrap_or_default()
                })
                .collect();
            let depth = row_sets.iter().map(|rows| rows.len()).min().unwrap_or(0);
            if row_sets.iter().any(|rows| rows.len() != depth) {
                log::warn!(
                    "entity row sets differ in size; join table truncated to {depth} rows"
                );
            }

            let placeholders = vec!["?"; fk_columns.len()].join(", ");
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {JOIN_TABLE} ({}) VALUES ({placeholders})",
                    fk_columns.join(", ")
                ))
                .map_err(|e| {
                    CacheError::Storage(format!("failed to prepare join insert: {e}"))
                })?;
            for i in 0..depth {
                let keys: Vec<&Option<String>> = row_sets.iter().map(|rows| &rows[i][0]).collect();
                stmt.execute(params_from_iter(keys)).map_err(|e| {
                    CacheError::Storage(format!("failed to insert join row: {e}"))
                })?;
            }
            drop(stmt);
        }

        // Stamp the rebuild; the metadata table was wiped with the rest.
        tx.execute(
            &format!("CREATE TABLE {METADATA_TABLE} (key TEXT PRIMARY KEY, value TEXT NOT NULL)"),
            [],
        )
        .map_err(|e| CacheError::Storage(format!("failed to create metadata table: {e}")))?;
        tx.execute(
            &format!("INSERT INTO {METADATA_TABLE} (key, value) VALUES ('{LAST_UPDATED_KEY}', ?1)"),
            params![Utc::now().to_rfc3339()],
        )
        .map_err(|e| CacheError::Storage(format!("failed to stamp rebuild time: {e}")))?;

        tx.commit()
            .map_err(|e| CacheError::Storage(format!("failed to commit rebuild: {e}")))?;

        log::info!(
            "store rebuilt: {} tables, {} total rows",
            counts.len(),
            counts.values().sum::<usize>()
        );
        Ok(counts)
    }

    /// Timestamp of the last successful rebuild, if the store has ever been
    /// rebuilt.
    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        let table_count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                params![METADATA_TABLE],
                |row| row.get(0),
            )
            .map_err(|e| CacheError::Storage(format!("failed to read metadata: {e}")))?;
        if table_count == 0 {
            return Ok(None);
        }

        let stamp: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT value FROM {METADATA_TABLE} WHERE key='{LAST_UPDATED_KEY}'"),
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CacheError::Storage(format!("failed to read metadata: {e}")))?;

        match stamp {
            Some(value) => {
                let parsed = DateTime::parse_from_rfc3339(&value).map_err(|e| {
                    CacheError::Storage(format!("malformed rebuild timestamp '{value}': {e}"))
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    /// Names of all user tables currently in the store (test helper and
    /// diagnostics).
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with("sqlite_"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouper::group_records;
    use serde_json::json;

    fn users_schema() -> TableSchema {
        TableSchema::from_value(&json!({"users": ["user_id", "username"]}))
            .unwrap()
            .sanitized()
            .unwrap()
    }

    fn user_rows() -> HashMap<String, RowSet> {
        let records: Vec<_> = [
            json!({"user_id": "1", "username": "ann"}),
            json!({"user_id": "2", "username": "bob"}),
        ]
        .iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();
        group_records(&records, &users_schema())
    }

    #[test]
    fn test_rebuild_counts_and_tables() {
        let mut store = CacheStore::memory().unwrap();
        let counts = store.rebuild(&users_schema(), &user_rows()).unwrap();

        assert_eq!(counts["users"], 2);
        let tables = store.table_names().unwrap();
        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&JOIN_TABLE.to_string()));

        let join_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM main_table", [], |row| row.get(0))
            .unwrap();
        assert_eq!(join_rows, 2);
    }

    #[test]
    fn test_rebuild_wipes_previous_schema() {
        let mut store = CacheStore::memory().unwrap();
        store.rebuild(&users_schema(), &user_rows()).unwrap();

        let next_schema = TableSchema::from_value(&json!({"products": ["product_id"]}))
            .unwrap()
            .sanitized()
            .unwrap();
        let records = vec![json!({"product_id": "p1"}).as_object().unwrap().clone()];
        let rows = group_records(&records, &next_schema);
        store.rebuild(&next_schema, &rows).unwrap();

        let tables = store.table_names().unwrap();
        assert!(!tables.contains(&"users".to_string()));
        assert!(tables.contains(&"products".to_string()));
    }

    #[test]
    fn test_join_truncates_to_shortest_row_set() {
        let schema = TableSchema::from_value(&json!({
            "users": ["user_id", "username"],
            "orders": ["order_id"],
        }))
        .unwrap()
        .sanitized()
        .unwrap();

        let records: Vec<_> = [
            json!({"user_id": "1", "username": "ann", "order_id": "o1"}),
            json!({"user_id": "2", "username": "bob", "order_id": "o1"}),
        ]
        .iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();
        // Two distinct user tuples, one distinct order tuple.
        let rows = group_records(&records, &schema);
        assert_eq!(rows["users"].len(), 2);
        assert_eq!(rows["orders"].len(), 1);

        let mut store = CacheStore::memory().unwrap();
        store.rebuild(&schema, &rows).unwrap();

        let join_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM main_table", [], |row| row.get(0))
            .unwrap();
        assert_eq!(join_rows, 1);
    }

    #[test]
    fn test_last_updated_stamped() {
        let mut store = CacheStore::memory().unwrap();
        assert!(store.last_updated().unwrap().is_none());

        let before = Utc::now();
        store.rebuild(&users_schema(), &user_rows()).unwrap();
        let stamp = store.last_updated().unwrap().unwrap();
        assert!(stamp >= before);
        assert!(stamp <= Utc::now());
    }

    #[test]
    fn test_entity_without_rows_gets_empty_table() {
        let mut store = CacheStore::memory().unwrap();
        let counts = store.rebuild(&users_schema(), &HashMap::new()).unwrap();
        assert_eq!(counts["users"], 0);

        let user_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(user_rows, 0);
    }
}

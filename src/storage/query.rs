//! Join query construction and execution
//!
//! Builds one SELECT across every schema entity joined through the
//! synthetic join table, with optional ANDed equality filters and an
//! optional substring search ORed across all columns. Identifiers come from
//! the sanitized schema; values are always bound parameters.

use crate::error::{CacheError, Result};
use crate::grouper::JsonMap;
use crate::schema::TableSchema;
use crate::storage::store::{CacheStore, JOIN_TABLE};
use rusqlite::params_from_iter;
use serde_json::Value;
use std::collections::HashMap;

/// A composed statement plus its bound values, in placeholder order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryPlan {
    pub sql: String,
    pub params: Vec<String>,
}

/// Compose the join query for `schema` with the given equality filters and
/// substring search.
///
/// Fails with `NoMatchingColumns` when `filters` is non-empty but none of
/// its keys names a schema column. Filter columns resolve against the first
/// entity declaring them; an empty search string means no search.
pub(crate) fn build_query(
    schema: &TableSchema,
    filters: &HashMap<String, String>,
    search: Option<&str>,
) -> Result<QueryPlan> {
    let mut where_clauses = Vec::new();
    let mut params = Vec::new();

    // Equality predicates, ANDed. Iterate schema order so the statement is
    // stable regardless of filter-map iteration order.
    if !filters.is_empty() {
        let mut matched = 0usize;
        for table in schema.tables() {
            for column in &table.columns {
                if let Some(value) = filters.get(column) {
                    if schema.column_table(column).map(|t| t.name.as_str())
                        != Some(table.name.as_str())
                    {
                        // Ambiguous column; an earlier entity already owns it.
                        continue;
                    }
                    where_clauses.push(format!("{}.{column} = ?", table.alias()));
                    params.push(value.clone());
                    matched += 1;
                }
            }
        }
        if matched == 0 {
            return Err(CacheError::NoMatchingColumns);
        }
    }

    let mut select_clauses = Vec::new();
    let mut join_clauses = Vec::new();
    let mut search_clauses = Vec::new();
    for table in schema.tables() {
        let alias = table.alias();
        for column in &table.columns {
            select_clauses.push(format!("{alias}.{column}"));
            search_clauses.push(format!("{alias}.{column} LIKE ?"));
        }
        let primary_key = table.primary_key();
        join_clauses.push(format!(
            "JOIN {} {alias} ON mt.{}_{primary_key} = {alias}.{primary_key}",
            table.name, table.name
        ));
    }

    // Substring search: one LIKE per column of every entity, ORed together
    // and ANDed with the filter predicates.
    if let Some(needle) = search.filter(|s| !s.is_empty()) {
        params.extend(std::iter::repeat_n(
            format!("%{needle}%"),
            search_clauses.len(),
        ));
        where_clauses.push(format!("({})", search_clauses.join(" OR ")));
    }

    let mut sql = format!(
        "SELECT {} FROM {JOIN_TABLE} mt {}",
        select_clauses.join(", "),
        join_clauses.join(" ")
    );
    if !where_clauses.is_empty() {
        sql.push_str(&format!(" WHERE {}", where_clauses.join(" AND ")));
    }

    Ok(QueryPlan { sql, params })
}

impl CacheStore {
    /// Run the filtered/searched join query and return rows as
    /// column-name -> value maps (TEXT or null).
    ///
    /// No filters and no search returns the full joined dataset. An empty
    /// schema returns no rows without touching the store.
    pub fn query(
        &self,
        schema: &TableSchema,
        filters: &HashMap<String, String>,
        search: Option<&str>,
    ) -> Result<Vec<JsonMap>> {
        if schema.is_empty() {
            return Ok(Vec::new());
        }

        let plan = build_query(schema, filters, search)?;
        log::debug!("executing query: {}", plan.sql);

        let mut stmt = self
            .conn
            .prepare(&plan.sql)
            .map_err(|e| CacheError::Storage(format!("failed to prepare query: {e}")))?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = stmt
            .query(params_from_iter(plan.params.iter()))
            .map_err(|e| CacheError::Storage(format!("failed to execute query: {e}")))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| CacheError::Storage(format!("failed to read query row: {e}")))?
        {
            let mut object = JsonMap::new();
            for (index, name) in column_names.iter().enumerate() {
                let cell: Option<String> = row.get(index).map_err(|e| {
                    CacheError::Storage(format!("failed to read column {name}: {e}"))
                })?;
                object.insert(name.clone(), cell.map(Value::String).unwrap_or(Value::Null));
            }
            results.push(object);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouper::group_records;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::from_value(&json!({
            "users": ["user_id", "username"],
            "orders": ["order_id", "amount"],
        }))
        .unwrap()
        .sanitized()
        .unwrap()
    }

    fn populated_store() -> CacheStore {
        let records: Vec<_> = [
            json!({"user_id": "1", "username": "ann", "order_id": "o1", "amount": "10"}),
            json!({"user_id": "2", "username": "bob", "order_id": "o2", "amount": "25"}),
        ]
        .iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();
        let rows = group_records(&records, &schema());

        let mut store = CacheStore::memory().unwrap();
        store.rebuild(&schema(), &rows).unwrap();
        store
    }

    #[test]
    fn test_build_query_plain() {
        let plan = build_query(&schema(), &HashMap::new(), None).unwrap();
        assert_eq!(
            plan.sql,
            "SELECT u.user_id, u.username, o.order_id, o.amount \
             FROM main_table mt \
             JOIN users u ON mt.users_user_id = u.user_id \
             JOIN orders o ON mt.orders_order_id = o.order_id"
        );
        assert!(plan.params.is_empty());
    }

    #[test]
    fn test_build_query_filters_and_search() {
        let filters = HashMap::from([("username".to_string(), "ann".to_string())]);
        let plan = build_query(&schema(), &filters, Some("x")).unwrap();

        assert!(plan.sql.contains("WHERE u.username = ? AND ("));
        assert!(plan.sql.contains("u.user_id LIKE ?"));
        assert!(plan.sql.contains("o.amount LIKE ?"));
        // One equality value plus one %x% per column.
        assert_eq!(plan.params.len(), 5);
        assert_eq!(plan.params[0], "ann");
        assert!(plan.params[1..].iter().all(|p| p == "%x%"));
    }

    #[test]
    fn test_build_query_no_matching_columns() {
        let filters = HashMap::from([("nope".to_string(), "1".to_string())]);
        assert!(matches!(
            build_query(&schema(), &filters, None),
            Err(CacheError::NoMatchingColumns)
        ));
    }

    #[test]
    fn test_query_full_dataset() {
        let store = populated_store();
        let rows = store.query(&schema(), &HashMap::new(), None).unwrap();

        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.contains_key("user_id"));
            assert!(row.contains_key("username"));
            assert!(row.contains_key("order_id"));
            assert!(row.contains_key("amount"));
        }
    }

    #[test]
    fn test_query_equality_filter() {
        let store = populated_store();
        let filters = HashMap::from([("username".to_string(), "ann".to_string())]);
        let rows = store.query(&schema(), &filters, None).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "ann");
    }

    #[test]
    fn test_query_search_across_entities() {
        let store = populated_store();

        // Matches a users column only.
        let rows = store.query(&schema(), &HashMap::new(), Some("bob")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "bob");

        // Matches an orders column only.
        let rows = store.query(&schema(), &HashMap::new(), Some("25")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["order_id"], "o2");

        // Substring common to both rows.
        let rows = store.query(&schema(), &HashMap::new(), Some("o")).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_query_filter_and_search_combined() {
        let store = populated_store();
        let filters = HashMap::from([("username".to_string(), "ann".to_string())]);

        let rows = store.query(&schema(), &filters, Some("10")).unwrap();
        assert_eq!(rows.len(), 1);

        let rows = store.query(&schema(), &filters, Some("25")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_query_empty_search_means_no_search() {
        let store = populated_store();
        let rows = store.query(&schema(), &HashMap::new(), Some("")).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_query_empty_schema() {
        let store = CacheStore::memory().unwrap();
        let rows = store
            .query(&TableSchema::default(), &HashMap::new(), None)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_query_null_cells_serialize_as_null() {
        let schema = TableSchema::from_value(&json!({"users": ["user_id", "username"]}))
            .unwrap()
            .sanitized()
            .unwrap();
        let records = vec![json!({"user_id": "1"}).as_object().unwrap().clone()];
        let rows_by_table = group_records(&records, &schema);

        let mut store = CacheStore::memory().unwrap();
        store.rebuild(&schema, &rows_by_table).unwrap();

        let rows = store.query(&schema, &HashMap::new(), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], Value::Null);
    }
}

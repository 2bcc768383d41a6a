//! Record normalization
//!
//! Converts the flat record list fetched from the remote source into
//! per-entity deduplicated row sets, following the active schema. Pure
//! functions, no I/O.

use crate::schema::TableSchema;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// A flat source record: field name -> JSON value
pub type JsonMap = serde_json::Map<String, Value>;

/// One normalized row: one text cell per schema column, `None` for
/// missing or null fields
pub type Row = Vec<Option<String>>;

/// Deduplicated row set for one entity. `BTreeSet` keeps iteration order
/// deterministic, which makes the positional join reproducible for a given
/// input.
pub type RowSet = BTreeSet<Row>;

/// Group a flat record list into per-entity row sets.
///
/// For every record and every entity, the entity's columns are projected out
/// of the record into a fixed-arity tuple; duplicates collapse via the set.
/// Every entity of the schema gets an entry, even when no record carries any
/// of its fields.
pub fn group_records(records: &[JsonMap], schema: &TableSchema) -> HashMap<String, RowSet> {
    let mut grouped: HashMap<String, RowSet> = schema
        .tables()
        .iter()
        .map(|t| (t.name.clone(), RowSet::new()))
        .collect();

    for record in records {
        for table in schema.tables() {
            let row: Row = table
                .columns
                .iter()
                .map(|column| cell_text(record.get(column)))
                .collect();
            if let Some(rows) = grouped.get_mut(&table.name) {
                rows.insert(row);
            }
        }
    }

    grouped
}

/// Render one record field as a text cell. All store columns are TEXT:
/// strings pass through verbatim, other scalars and compounds keep their
/// JSON rendering, null and absent both become `None`.
fn cell_text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::from_value(&json!({
            "users": ["user_id", "username"],
            "orders": ["order_id", "total"],
        }))
        .unwrap()
    }

    fn record(value: Value) -> JsonMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_groups_by_entity() {
        let records = vec![
            record(json!({"user_id": "1", "username": "ann", "order_id": "o1", "total": 9.5})),
            record(json!({"user_id": "2", "username": "bob", "order_id": "o2", "total": 3})),
        ];
        let grouped = group_records(&records, &schema());

        assert_eq!(grouped["users"].len(), 2);
        assert_eq!(grouped["orders"].len(), 2);
        assert!(grouped["users"].contains(&vec![
            Some("1".to_string()),
            Some("ann".to_string())
        ]));
        // Non-string scalars keep their JSON rendering.
        assert!(grouped["orders"].contains(&vec![
            Some("o1".to_string()),
            Some("9.5".to_string())
        ]));
    }

    #[test]
    fn test_duplicates_collapse() {
        let records = vec![
            record(json!({"user_id": "1", "username": "ann"})),
            record(json!({"user_id": "1", "username": "ann"})),
            record(json!({"user_id": "1", "username": "ann"})),
        ];
        let grouped = group_records(&records, &schema());
        assert_eq!(grouped["users"].len(), 1);
    }

    #[test]
    fn test_missing_and_null_fields_are_none() {
        let records = vec![record(json!({"user_id": "1", "username": null}))];
        let grouped = group_records(&records, &schema());

        assert!(grouped["users"].contains(&vec![Some("1".to_string()), None]));
        // No order fields at all: one all-None tuple.
        assert!(grouped["orders"].contains(&vec![None, None]));
    }

    #[test]
    fn test_every_entity_gets_an_entry() {
        let grouped = group_records(&[], &schema());
        assert_eq!(grouped.len(), 2);
        assert!(grouped["users"].is_empty());
        assert!(grouped["orders"].is_empty());
    }
}

//! Schema model and identifier sanitization
//!
//! A [`TableSchema`] is the operator-supplied description of the relational
//! store: an ordered list of entities, each with an ordered list of columns.
//! The first column of every entity is its primary key.
//!
//! Table and column names are interpolated into SQL text when the store is
//! rebuilt, so every externally supplied schema must pass through
//! [`TableSchema::sanitized`] before it is used to compose any statement.
//! Values, by contrast, are always bound as parameters and never need
//! sanitizing.

use crate::error::{CacheError, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Sanitize a single string into a safe SQL identifier.
///
/// Replaces every character outside `[A-Za-z0-9_]` with `_` and prefixes an
/// `_` when the result would start with a digit. Fails with
/// `InvalidIdentifier` on empty or all-whitespace input. Idempotent.
pub fn sanitize_identifier(identifier: &str) -> Result<String> {
    if identifier.trim().is_empty() {
        return Err(CacheError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    let mut sanitized: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    // SQL identifiers cannot start with a digit.
    if sanitized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }

    Ok(sanitized)
}

/// One entity of the schema: a table name plus its ordered column list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
}

impl Table {
    /// The entity's primary key: its first declared column.
    ///
    /// Every schema that reaches the store has passed [`TableSchema::sanitized`],
    /// which rejects entities without columns.
    pub fn primary_key(&self) -> &str {
        &self.columns[0]
    }

    /// Table alias used in composed queries: the name's first character.
    /// Entities sharing a first letter collide; accepted limitation.
    pub fn alias(&self) -> &str {
        let end = self
            .name
            .char_indices()
            .nth(1)
            .map_or(self.name.len(), |(i, _)| i);
        &self.name[..end]
    }
}

/// Ordered mapping of entity name -> column list.
///
/// Order matters twice over: entity order fixes the join-table column order,
/// and column order fixes each entity's primary key (the first column).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    tables: Vec<Table>,
}

impl TableSchema {
    /// Build a schema from name/columns pairs, preserving the given order.
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    /// Parse a schema from a JSON value of the shape
    /// `{"entity": ["col_a", "col_b"], ...}`.
    ///
    /// Fails with `InvalidSchema` when the value is not an object, a value is
    /// not an array, or an array element is not a string. Entity order is the
    /// object's declared order.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CacheError::InvalidSchema(e.to_string()))
    }

    /// Apply [`sanitize_identifier`] to every table and column name.
    ///
    /// This is the sole injection defense for identifiers; call it once at
    /// the ingestion boundary, before the schema is used to build statements.
    /// Also rejects entities with no columns, since the first column doubles
    /// as the primary key.
    pub fn sanitized(&self) -> Result<TableSchema> {
        let mut tables = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            if table.columns.is_empty() {
                return Err(CacheError::InvalidSchema(format!(
                    "table '{}' has no columns",
                    table.name
                )));
            }
            let name = sanitize_identifier(&table.name)?;
            let columns = table
                .columns
                .iter()
                .map(|c| sanitize_identifier(c))
                .collect::<Result<Vec<_>>>()?;
            tables.push(Table { name, columns });
        }
        Ok(TableSchema { tables })
    }

    /// Tables in declared order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Find the first table (in declared order) containing `column`.
    ///
    /// Columns shared by several entities resolve to the first declarer;
    /// accepted limitation.
    pub fn column_table(&self, column: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.columns.iter().any(|c| c == column))
    }
}

// Hand-written rather than derived: the JSON object's declared entity order
// is semantically meaningful and must survive deserialization.
impl<'de> Deserialize<'de> for TableSchema {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = TableSchema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of table names to lists of column names")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<TableSchema, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut tables = Vec::new();
                while let Some((name, columns)) = map.next_entry::<String, Vec<String>>()? {
                    tables.push(Table { name, columns });
                }
                Ok(TableSchema { tables })
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

//! Core domain types: rows, tables, field schemas, and external data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EnrichError, Result};

/// Free-form auxiliary context handed to the prompt builder.
///
/// Backed by `serde_json::Map`, which iterates in key order, so anything
/// rendered from it is deterministic.
pub type ExternalData = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// One record of a table, keyed by column name.
///
/// Cells keep insertion order. An empty string is a missing value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(column, value)` pairs. Later duplicates overwrite earlier ones.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut row = Self::new();
        for (k, v) in pairs {
            row.set(k, v);
        }
        row
    }

    /// Raw cell value, including empty strings.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Cell value if present and non-empty.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|v| !v.trim().is_empty())
    }

    /// Insert or replace a cell.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(c, _)| *c == column) {
            Some((_, v)) => *v = value,
            None => self.cells.push((column, value)),
        }
    }

    /// Remove a cell, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<String> {
        let idx = self.cells.iter().position(|(c, _)| c == column)?;
        Some(self.cells.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// An ordered sequence of rows with unique, ordered column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Create an empty table. Fails if a column name repeats.
    pub fn new(columns: Vec<String>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].contains(col) {
                return Err(EnrichError::validation(format!(
                    "duplicate column `{col}`"
                )));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Append `name` as an empty column if it is not present yet.
    /// Returns `true` when the column was added.
    pub fn ensure_column(&mut self, name: &str) -> bool {
        if self.has_column(name) {
            return false;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            if row.get(name).is_none() {
                row.set(name, "");
            }
        }
        true
    }

    /// Remove the named columns from the header and from every row.
    pub fn drop_columns(&mut self, names: &[String]) {
        self.columns.retain(|c| !names.contains(c));
        for row in &mut self.rows {
            for name in names {
                row.remove(name);
            }
        }
    }

    /// Cell values of `row` in column order; missing cells are empty.
    pub fn record<'a>(&'a self, row: &'a Row) -> impl Iterator<Item = &'a str> {
        self.columns.iter().map(|c| row.get(c).unwrap_or(""))
    }
}

// ---------------------------------------------------------------------------
// Field schema
// ---------------------------------------------------------------------------

/// A field the model must populate, with its natural-language description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

/// Ordered mapping of required field name to description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldSpec>", into = "Vec<FieldSpec>")]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// Build a schema, rejecting duplicate or blank field names.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(EnrichError::validation("field name must not be empty"));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(EnrichError::validation(format!(
                    "duplicate schema field `{}`",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Convenience constructor from `(name, description)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, description)| FieldSpec {
                    name: name.into(),
                    description: description.into(),
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<Vec<FieldSpec>> for FieldSchema {
    type Error = EnrichError;

    fn try_from(fields: Vec<FieldSpec>) -> Result<Self> {
        Self::new(fields)
    }
}

impl From<FieldSchema> for Vec<FieldSpec> {
    fn from(schema: FieldSchema) -> Self {
        schema.fields
    }
}

// ---------------------------------------------------------------------------
// External data contexts
// ---------------------------------------------------------------------------

/// External data constant across all rows of a run.
///
/// Shared read-only (behind an `Arc`) by every row task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalContext {
    data: ExternalData,
}

impl GlobalContext {
    pub fn new(data: ExternalData) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn data(&self) -> &ExternalData {
        &self.data
    }
}

/// External data gathered for one row. Owned by that row's task only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowContext {
    data: ExternalData,
}

impl RowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn data(&self) -> &ExternalData {
        &self.data
    }

    /// Layer this row's data over the global context. Row keys win on conflict.
    pub fn merged_with(&self, global: &GlobalContext) -> ExternalData {
        let mut merged = global.data.clone();
        for (k, v) in &self.data {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_set_replaces_in_place() {
        let mut row = Row::from_pairs([("Name", "Acme"), ("URL", "https://acme.test")]);
        row.set("Name", "Acme Corp");
        row.set("Summary", "");
        let cols: Vec<_> = row.iter().map(|(c, _)| c).collect();
        assert_eq!(cols, ["Name", "URL", "Summary"]);
        assert_eq!(row.get("Name"), Some("Acme Corp"));
        assert_eq!(row.get("Summary"), Some(""));
        assert_eq!(row.value("Summary"), None);
    }

    #[test]
    fn table_rejects_duplicate_columns() {
        let err = Table::new(vec!["A".into(), "B".into(), "A".into()]).unwrap_err();
        assert!(err.to_string().contains("duplicate column `A`"));
    }

    #[test]
    fn ensure_column_fills_existing_rows() {
        let mut table = Table::new(vec!["Name".into()]).unwrap();
        table.push_row(Row::from_pairs([("Name", "Acme")]));
        assert!(table.ensure_column("Summary"));
        assert!(!table.ensure_column("Summary"));
        assert_eq!(table.columns(), ["Name", "Summary"]);
        assert_eq!(table.rows()[0].get("Summary"), Some(""));
    }

    #[test]
    fn drop_columns_removes_cells() {
        let mut table = Table::new(vec!["Name".into(), "Email".into(), "Id".into()]).unwrap();
        table.push_row(Row::from_pairs([("Name", "A"), ("Email", "a@x"), ("Id", "1")]));
        table.drop_columns(&["Name".into(), "Email".into()]);
        assert_eq!(table.columns(), ["Id"]);
        assert_eq!(table.rows()[0].get("Email"), None);
        assert_eq!(table.record(&table.rows()[0]).collect::<Vec<_>>(), ["1"]);
    }

    #[test]
    fn schema_keeps_declared_order() {
        let schema =
            FieldSchema::from_pairs([("Summary", "one sentence"), ("Industry", "sector")]).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), ["Summary", "Industry"]);
    }

    #[test]
    fn schema_rejects_duplicates() {
        let result = FieldSchema::from_pairs([("A", "x"), ("A", "y")]);
        assert!(result.is_err());
    }

    #[test]
    fn schema_deserializes_from_toml_array() {
        #[derive(Deserialize)]
        struct Wrapper {
            fields: FieldSchema,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
[[fields]]
name = "Summary"
description = "one sentence about the company"

[[fields]]
name = "Industry"
description = "primary industry"
"#,
        )
        .unwrap();
        assert_eq!(parsed.fields.len(), 2);
        assert!(parsed.fields.contains("Industry"));
    }

    #[test]
    fn row_context_overrides_global() {
        let mut global = ExternalData::new();
        global.insert("Company Profile".into(), json!("global"));
        global.insert("URL Content".into(), json!("stale"));
        let global = GlobalContext::new(global);

        let mut row = RowContext::new();
        row.insert("URL Content", json!("fresh"));

        let merged = row.merged_with(&global);
        assert_eq!(merged["URL Content"], json!("fresh"));
        assert_eq!(merged["Company Profile"], json!("global"));
        // The global context itself is untouched.
        assert_eq!(global.get("URL Content"), Some(&json!("stale")));
    }
}

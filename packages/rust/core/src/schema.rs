//! Structural checks on the loaded table.

use tracing::debug;

use table_enrich_shared::{EnrichError, FieldSchema, Result, Row, Table};

/// Fail when any required column is absent from the table header.
///
/// Empty cells are not checked here; they surface later as row failures.
pub fn validate_columns(table: &Table, required: &[String]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|c| !table.has_column(c))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EnrichError::schema(format!(
            "required column(s) missing from input: {}",
            missing.join(", ")
        )))
    }
}

/// Append every schema field that is not yet a column, in schema order.
pub fn ensure_schema_columns(table: &mut Table, schema: &FieldSchema) -> usize {
    let added = schema
        .names()
        .filter(|name| table.ensure_column(name))
        .count();
    if added > 0 {
        debug!(added, "added schema columns");
    }
    added
}

/// True when every schema field holds a real value.
pub fn is_complete(row: &Row, schema: &FieldSchema, failure_marker: &str) -> bool {
    schema
        .names()
        .all(|f| row.value(f).is_some_and(|v| v != failure_marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        let mut t = Table::new(vec!["Name".into(), "URL".into()]).unwrap();
        t.push_row(Row::from_pairs([("Name", "Acme"), ("URL", "")]));
        t
    }

    #[test]
    fn missing_column_is_schema_error() {
        let err = validate_columns(&table(), &["Name".into(), "Email".into()]).unwrap_err();
        assert!(matches!(err, EnrichError::Schema { .. }));
        assert!(err.to_string().contains("Email"));
    }

    #[test]
    fn empty_cells_are_not_schema_errors() {
        validate_columns(&table(), &["Name".into(), "URL".into()]).unwrap();
    }

    #[test]
    fn schema_columns_are_appended_once() {
        let schema = FieldSchema::from_pairs([("Summary", "s"), ("Name", "n"), ("Tags", "t")]).unwrap();
        let mut t = table();
        assert_eq!(ensure_schema_columns(&mut t, &schema), 2);
        assert_eq!(t.columns(), ["Name", "URL", "Summary", "Tags"]);
        assert_eq!(ensure_schema_columns(&mut t, &schema), 0);
    }

    #[test]
    fn completeness_ignores_failure_marker() {
        let schema = FieldSchema::from_pairs([("Summary", "s")]).unwrap();
        assert!(is_complete(&Row::from_pairs([("Summary", "ok")]), &schema, "#FAILED"));
        assert!(!is_complete(&Row::from_pairs([("Summary", "#FAILED")]), &schema, "#FAILED"));
        assert!(!is_complete(&Row::from_pairs([("Summary", "  ")]), &schema, "#FAILED"));
        assert!(!is_complete(&Row::new(), &schema, "#FAILED"));
    }
}

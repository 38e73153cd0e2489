//! Prompt construction.
//!
//! [`build_prompt`] is a pure function of its inputs: identical row, schema
//! and external data always render the identical string.

use serde_json::Value;

use table_enrich_shared::{ExternalData, FieldSchema, Row};

/// Build the model prompt for one row.
///
/// Schema fields are excluded from the existing row data, since they are
/// what the model is asked to produce.
pub fn build_prompt(schema: &FieldSchema, row: &Row, external: &ExternalData) -> String {
    let fields = ordered_object(schema.iter().map(|f| (f.name.as_str(), f.description.as_str())));
    let row_data = ordered_object(row.iter().filter(|(col, _)| !schema.contains(col)));
    let external = serde_json::to_string_pretty(&Value::Object(external.clone()))
        .unwrap_or_else(|_| "{}".to_string());
    let blueprint = json_blueprint(schema);

    format!(
        "**Task:**\n\
         Using the data provided below, generate the following fields for a row in a table, \
         outputted as a JSON object. The value for each field describes what it should contain.\n\
         {fields}\n\
         \n\
         **Existing Row Data**\n\
         {row_data}\n\
         \n\
         **External Data**\n\
         {external}\n\
         \n\
         **Example Output (Success):**\n\
         ```json\n\
         {blueprint}\n\
         ```\n"
    )
}

/// A JSON object with every schema field mapped to `""`, in schema order.
pub fn json_blueprint(schema: &FieldSchema) -> String {
    ordered_object(schema.names().map(|name| (name, "")))
}

/// Render string pairs as a pretty JSON object, keeping the given order.
fn ordered_object<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let body: Vec<String> = pairs
        .map(|(k, v)| format!("  {}: {}", quote(k), quote(v)))
        .collect();
    if body.is_empty() {
        "{}".to_string()
    } else {
        format!("{{\n{}\n}}", body.join(",\n"))
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

//! Reversible anonymization of CSV tables.
//!
//! [`anonymize_rows`] replaces personal columns with a deterministic ID;
//! [`de_anonymize_rows`] restores them by joining on that ID against a keyed
//! copy of the source. The mapping from ID to person is never stored in the
//! anonymized output.

mod id;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use table_enrich_shared::{EnrichError, Result, Row, Table};
use table_enrich_table::{read_csv, write_csv};

pub use id::{DEFAULT_ID_LENGTH, generate_unique_id};

/// Default name of the ID column.
pub const DEFAULT_ID_COLUMN: &str = "ID";

/// Parameters for [`anonymize_rows`].
#[derive(Debug, Clone)]
pub struct AnonymizeOptions {
    pub seed: String,
    /// Columns removed from the anonymized output.
    pub personal_info_fields: Vec<String>,
    /// Columns hashed (in order) into the ID.
    pub id_fields: Vec<String>,
    pub prefix: String,
    pub length: usize,
    pub id_column: String,
    /// Where to write the source plus its ID column, for later re-joining.
    pub keyed_copy: Option<PathBuf>,
}

impl Default for AnonymizeOptions {
    fn default() -> Self {
        Self {
            seed: String::new(),
            personal_info_fields: Vec::new(),
            id_fields: Vec::new(),
            prefix: String::new(),
            length: DEFAULT_ID_LENGTH,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            keyed_copy: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnonymizeSummary {
    pub rows: usize,
    /// Rows whose ID was already produced by an earlier row.
    pub duplicate_ids: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeanonymizeSummary {
    /// Rows written to the merged output.
    pub matched: usize,
    /// Anonymized rows with no original row for their ID (dropped).
    pub unmatched_anonymized: usize,
    /// Original rows never referenced by the anonymized file.
    pub unmatched_original: usize,
    /// Original rows ignored because an earlier row had the same ID.
    pub duplicate_original_ids: usize,
}

/// Read `file_path`, add an ID column and write it without personal fields.
///
/// The source file is left untouched.
#[instrument(skip(options), fields(input = %file_path.display(), output = %output_path.display()))]
pub fn anonymize_rows(
    file_path: &Path,
    output_path: &Path,
    options: &AnonymizeOptions,
) -> Result<AnonymizeSummary> {
    if options.keyed_copy.as_deref() == Some(file_path) {
        return Err(EnrichError::validation(
            "keyed copy must not overwrite the source file",
        ));
    }

    let source = read_csv(file_path)?;
    let (keyed, anonymized, summary) = anonymize_table(source, options)?;

    if let Some(path) = &options.keyed_copy {
        write_csv(path, &keyed)?;
        info!(path = %path.display(), "wrote keyed copy");
    }
    write_csv(output_path, &anonymized)?;

    info!(rows = summary.rows, duplicate_ids = summary.duplicate_ids, "anonymized");
    Ok(summary)
}

/// In-memory form of [`anonymize_rows`]: returns the keyed table and the
/// anonymized table.
pub fn anonymize_table(
    mut table: Table,
    options: &AnonymizeOptions,
) -> Result<(Table, Table, AnonymizeSummary)> {
    require_columns(&table, &options.personal_info_fields, "personal info")?;
    require_columns(&table, &options.id_fields, "ID")?;
    if options.id_fields.is_empty() {
        return Err(EnrichError::validation("at least one ID field is required"));
    }
    if options.personal_info_fields.contains(&options.id_column) {
        return Err(EnrichError::validation(format!(
            "ID column `{}` cannot also be a personal info field",
            options.id_column
        )));
    }

    table.ensure_column(&options.id_column);

    let mut seen = HashSet::new();
    let mut duplicate_ids = 0;
    for row in table.rows_mut() {
        let id = generate_unique_id(
            row,
            &options.seed,
            &options.id_fields,
            &options.prefix,
            options.length,
        );
        if !seen.insert(id.clone()) {
            duplicate_ids += 1;
        }
        row.set(options.id_column.as_str(), id);
    }

    if duplicate_ids > 0 {
        warn!(
            duplicate_ids,
            "rows share an ID; choose ID fields that are unique per row to avoid ambiguous re-joins"
        );
    }

    let summary = AnonymizeSummary {
        rows: table.len(),
        duplicate_ids,
    };
    let mut anonymized = table.clone();
    anonymized.drop_columns(&options.personal_info_fields);
    Ok((table, anonymized, summary))
}

/// Restore personal fields into an anonymized (and possibly enriched) file.
///
/// Inner join on `id_field`: output rows follow the anonymized file's order,
/// and rows without a counterpart on either side are left out and counted.
#[instrument(skip(personal_info_fields), fields(output = %output_path.display()))]
pub fn de_anonymize_rows(
    original_file_path: &Path,
    anonymized_file_path: &Path,
    output_path: &Path,
    personal_info_fields: &[String],
    id_field: &str,
) -> Result<DeanonymizeSummary> {
    let original = read_csv(original_file_path)?;
    let anonymized = read_csv(anonymized_file_path)?;
    let (merged, summary) = de_anonymize_table(&original, &anonymized, personal_info_fields, id_field)?;
    write_csv(output_path, &merged)?;

    if summary.unmatched_anonymized > 0 || summary.unmatched_original > 0 {
        warn!(
            unmatched_anonymized = summary.unmatched_anonymized,
            unmatched_original = summary.unmatched_original,
            "rows without a matching ID were excluded from the merged output"
        );
    }
    info!(matched = summary.matched, "de-anonymized");
    Ok(summary)
}

/// In-memory form of [`de_anonymize_rows`].
pub fn de_anonymize_table(
    original: &Table,
    anonymized: &Table,
    personal_info_fields: &[String],
    id_field: &str,
) -> Result<(Table, DeanonymizeSummary)> {
    let id_field = id_field.to_string();
    require_columns(original, std::slice::from_ref(&id_field), "original ID")?;
    require_columns(original, personal_info_fields, "personal info")?;
    require_columns(anonymized, std::slice::from_ref(&id_field), "anonymized ID")?;

    let mut summary = DeanonymizeSummary::default();
    let mut by_id: HashMap<&str, &Row> = HashMap::new();
    for row in original.rows() {
        let Some(id) = row.value(&id_field) else {
            continue;
        };
        if by_id.contains_key(id) {
            summary.duplicate_original_ids += 1;
        } else {
            by_id.insert(id, row);
        }
    }
    if summary.duplicate_original_ids > 0 {
        warn!(
            duplicates = summary.duplicate_original_ids,
            "original file has repeated IDs; the first occurrence is used"
        );
    }

    let mut columns = anonymized.columns().to_vec();
    for field in personal_info_fields {
        if !columns.contains(field) {
            columns.push(field.clone());
        }
    }
    let mut merged = Table::new(columns)?;

    let mut used: HashSet<&str> = HashSet::new();
    for row in anonymized.rows() {
        let source = row.value(&id_field).and_then(|id| by_id.get(id).map(|src| (id, src)));
        let Some((id, source)) = source else {
            summary.unmatched_anonymized += 1;
            continue;
        };

        let mut out = row.clone();
        for field in personal_info_fields {
            out.set(field.as_str(), source.get(field).unwrap_or_default());
        }
        merged.push_row(out);
        used.insert(id);
        summary.matched += 1;
    }
    summary.unmatched_original = by_id.len() - used.len();

    Ok((merged, summary))
}

fn require_columns(table: &Table, columns: &[String], what: &str) -> Result<()> {
    let missing: Vec<&str> = columns
        .iter()
        .filter(|c| !table.has_column(c))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EnrichError::schema(format!(
            "{what} column(s) not found: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn contacts() -> Table {
        let mut t = Table::new(strings(&["Name", "Email", "Company"])).unwrap();
        t.push_row(Row::from_pairs([("Name", "Ada"), ("Email", "ada@example.com"), ("Company", "Analytical")]));
        t.push_row(Row::from_pairs([("Name", "Grace"), ("Email", "grace@example.com"), ("Company", "Navy")]));
        t.push_row(Row::from_pairs([("Name", "Alan"), ("Email", "alan@example.com"), ("Company", "Bletchley")]));
        t
    }

    fn options() -> AnonymizeOptions {
        AnonymizeOptions {
            seed: "s3cret".into(),
            personal_info_fields: strings(&["Name", "Email"]),
            id_fields: strings(&["Email"]),
            prefix: "CON".into(),
            ..AnonymizeOptions::default()
        }
    }

    #[test]
    fn anonymized_table_has_no_personal_fields() {
        let (keyed, anon, summary) = anonymize_table(contacts(), &options()).unwrap();
        assert_eq!(anon.columns(), ["Company", "ID"]);
        assert_eq!(keyed.columns(), ["Name", "Email", "Company", "ID"]);
        assert_eq!(summary, AnonymizeSummary { rows: 3, duplicate_ids: 0 });

        let id = anon.rows()[0].get("ID").unwrap();
        assert!(id.starts_with("CON"));
        assert_eq!(id.len(), 3 + DEFAULT_ID_LENGTH);
        assert_eq!(keyed.rows()[0].get("ID"), Some(id));
    }

    #[test]
    fn collisions_are_counted() {
        let mut t = contacts();
        t.push_row(Row::from_pairs([("Name", "Ada L."), ("Email", "ada@example.com"), ("Company", "X")]));
        let (_, _, summary) = anonymize_table(t, &options()).unwrap();
        assert_eq!(summary.duplicate_ids, 1);
    }

    #[test]
    fn missing_personal_field_is_schema_error() {
        let mut opts = options();
        opts.personal_info_fields.push("Phone".into());
        let err = anonymize_table(contacts(), &opts).unwrap_err();
        assert!(matches!(err, EnrichError::Schema { .. }));
    }

    #[test]
    fn round_trip_restores_personal_fields() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("contacts.csv");
        let keyed = dir.path().join("contacts_keyed.csv");
        let anon = dir.path().join("anon.csv");
        let merged = dir.path().join("merged.csv");
        write_csv(&source, &contacts()).unwrap();
        let before = std::fs::read_to_string(&source).unwrap();

        let opts = AnonymizeOptions {
            keyed_copy: Some(keyed.clone()),
            ..options()
        };
        anonymize_rows(&source, &anon, &opts).unwrap();
        assert_eq!(std::fs::read_to_string(&source).unwrap(), before);

        // Simulate enrichment of the anonymized file.
        let mut enriched = read_csv(&anon).unwrap();
        enriched.ensure_column("Summary");
        for row in enriched.rows_mut() {
            let company = row.get("Company").unwrap_or_default().to_string();
            row.set("Summary", format!("Works at {company}"));
        }
        write_csv(&anon, &enriched).unwrap();

        let summary = de_anonymize_rows(&keyed, &anon, &merged, &opts.personal_info_fields, "ID").unwrap();
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.unmatched_anonymized, 0);

        let out = read_csv(&merged).unwrap();
        assert_eq!(out.columns(), ["Company", "ID", "Summary", "Name", "Email"]);
        let original = contacts();
        for (restored, orig) in out.rows().iter().zip(original.rows()) {
            assert_eq!(restored.get("Name"), orig.get("Name"));
            assert_eq!(restored.get("Email"), orig.get("Email"));
            assert_eq!(
                restored.get("Summary").unwrap(),
                format!("Works at {}", orig.get("Company").unwrap())
            );
        }
    }

    #[test]
    fn join_is_inner_and_counts_mismatches() {
        let (keyed, mut anon, _) = anonymize_table(contacts(), &options()).unwrap();
        // Lose one anonymized row and add one with an unknown ID.
        let mut rows = std::mem::replace(&mut anon, Table::new(strings(&["Company", "ID"])).unwrap())
            .into_rows();
        rows.remove(1);
        rows.push(Row::from_pairs([("Company", "Ghost"), ("ID", "CONunknown")]));
        for row in rows {
            anon.push_row(row);
        }

        let (merged, summary) =
            de_anonymize_table(&keyed, &anon, &strings(&["Name", "Email"]), "ID").unwrap();
        assert_eq!(
            summary,
            DeanonymizeSummary {
                matched: 2,
                unmatched_anonymized: 1,
                unmatched_original: 1,
                duplicate_original_ids: 0,
            }
        );
        let names: Vec<_> = merged.rows().iter().map(|r| r.get("Name").unwrap()).collect();
        assert_eq!(names, ["Ada", "Alan"]);
    }

    #[test]
    fn keyed_copy_cannot_replace_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("contacts.csv");
        write_csv(&source, &contacts()).unwrap();
        let opts = AnonymizeOptions {
            keyed_copy: Some(source.clone()),
            ..options()
        };
        assert!(anonymize_rows(&source, &dir.path().join("a.csv"), &opts).is_err());
    }
}

//! CSV table I/O and batch checkpointing.
//!
//! Every cell is read and written as a string; an empty cell is a missing
//! value. Writes that replace a file go through a temporary sibling that is
//! renamed into place, so readers never observe a half-written table.

mod checkpoint;

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use tracing::debug;

use table_enrich_shared::{EnrichError, Result, Row, Table};

pub use checkpoint::{Checkpoint, CheckpointMode};

/// Read a CSV file with a header row into a [`Table`].
pub fn read_csv(path: &Path) -> Result<Table> {
    let file = File::open(path).map_err(|e| EnrichError::io(path, e))?;
    // Short rows are common in hand-edited sheets; their missing trailing
    // cells stay absent.
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| EnrichError::Csv(format!("{}: {e}", path.display())))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut table = Table::new(headers.clone())
        .map_err(|e| EnrichError::Csv(format!("{}: {e}", path.display())))?;

    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| EnrichError::Csv(format!("{} row {}: {e}", path.display(), line + 1)))?;
        if record.len() > headers.len() {
            return Err(EnrichError::Csv(format!(
                "{} row {}: {} fields, header has {}",
                path.display(),
                line + 1,
                record.len(),
                headers.len()
            )));
        }
        table.push_row(Row::from_pairs(
            headers.iter().cloned().zip(record.iter().map(str::to_string)),
        ));
    }

    debug!(path = %path.display(), rows = table.len(), columns = table.columns().len(), "read csv");
    Ok(table)
}

/// Write a whole table to `path`, replacing any existing file atomically.
pub fn write_csv(path: &Path, table: &Table) -> Result<()> {
    write_atomic(path, table, table.rows())
}

/// Serialize `rows` (with the table's header) to `writer`.
pub(crate) fn write_rows<W: Write>(
    writer: W,
    table: &Table,
    rows: &[Row],
    with_header: bool,
) -> Result<W> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    if with_header {
        csv_writer.write_record(table.columns())?;
    }
    for row in rows {
        csv_writer.write_record(table.record(row))?;
    }
    csv_writer.flush().map_err(|e| EnrichError::Csv(e.to_string()))?;
    csv_writer
        .into_inner()
        .map_err(|e| EnrichError::Csv(e.to_string()))
}

/// Write header + `rows` to a temp file beside `path`, then rename over it.
pub(crate) fn write_atomic(path: &Path, table: &Table, rows: &[Row]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| EnrichError::io(dir, e))?;

    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| EnrichError::io(dir, e))?;
    let tmp = write_rows(tmp, table, rows, true)?;
    set_permissions(tmp.as_file(), path)?;
    tmp.as_file().sync_all().map_err(|e| EnrichError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| EnrichError::io(path, e.error))?;
    Ok(())
}

/// Give the temp file the permissions of the file it replaces, or the usual
/// `0644` for a new file (temp files are created `0600`).
fn set_permissions(tmp: &File, path: &Path) -> Result<()> {
    if let Ok(meta) = std::fs::metadata(path) {
        return tmp
            .set_permissions(meta.permissions())
            .map_err(|e| EnrichError::io(path, e));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(|e| EnrichError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut table = Table::new(vec!["Name".into(), "URL".into(), "Notes".into()]).unwrap();
        table.push_row(Row::from_pairs([
            ("Name", "Acme"),
            ("URL", "https://acme.test"),
            ("Notes", "has, comma"),
        ]));
        table.push_row(Row::from_pairs([("Name", "Globex"), ("URL", ""), ("Notes", "line\nbreak")]));
        table
    }

    #[test]
    fn write_then_read_preserves_cells_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let table = sample_table();

        write_csv(&path, &table).unwrap();
        let back = read_csv(&path).unwrap();

        assert_eq!(back.columns(), table.columns());
        assert_eq!(back.len(), 2);
        assert_eq!(back.rows()[0].get("Notes"), Some("has, comma"));
        assert_eq!(back.rows()[1].get("Name"), Some("Globex"));
        assert_eq!(back.rows()[1].get("URL"), Some(""));
        assert_eq!(back.rows()[1].get("Notes"), Some("line\nbreak"));
    }

    #[test]
    fn read_missing_file_is_io_error() {
        let err = read_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, EnrichError::Io { .. }));
    }

    #[test]
    fn read_rejects_duplicate_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        std::fs::write(&path, "A,B,A\n1,2,3\n").unwrap();
        let err = read_csv(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.csv");
        write_csv(&path, &sample_table()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn short_rows_leave_trailing_cells_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "Name,URL,Notes\nAcme,https://a.test\nGlobex,https://g.test,ok\n").unwrap();

        let table = read_csv(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].get("URL"), Some("https://a.test"));
        assert_eq!(table.rows()[0].get("Notes"), None);
        assert_eq!(table.rows()[1].get("Notes"), Some("ok"));
    }

    #[test]
    fn read_rejects_rows_longer_than_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        std::fs::write(&path, "Name,URL\nAcme,https://a.test\nGlobex,https://g.test,extra\n").unwrap();

        let err = read_csv(&path).unwrap_err();
        assert!(matches!(err, EnrichError::Csv(_)));
        assert!(err.to_string().contains("row 2: 3 fields, header has 2"));
    }

    #[cfg(unix)]
    #[test]
    fn write_keeps_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing.csv");
        std::fs::write(&existing, "old\n").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o640)).unwrap();
        write_csv(&existing, &sample_table()).unwrap();
        let mode = std::fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);

        let fresh = dir.path().join("fresh.csv");
        write_csv(&fresh, &sample_table()).unwrap();
        let mode = std::fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}

//! Local file ingestion: CSV tables and PDF text.
//!
//! Both readers are blocking and run on tokio's blocking pool so a slow disk
//! never stalls other row tasks.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use table_enrich_shared::{EnrichError, Result};

/// Load a CSV file as a list of JSON objects, one per row, keyed by header.
pub async fn load_csv_records(path: &Path) -> Result<Vec<Value>> {
    let path = path.to_path_buf();
    run_blocking(move || {
        let table = table_enrich_table::read_csv(&path)?;
        let records: Vec<Value> = table
            .rows()
            .iter()
            .map(|row| {
                let obj: Map<String, Value> = row
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                    .collect();
                Value::Object(obj)
            })
            .collect();
        debug!(path = %path.display(), rows = records.len(), "loaded csv records");
        Ok(records)
    })
    .await
}

/// Extract the plain text of a PDF document.
pub async fn extract_pdf_text(path: &Path) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    run_blocking(move || {
        let bytes = std::fs::read(&path).map_err(|e| EnrichError::io(&path, e))?;
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| EnrichError::parse(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), chars = text.len(), "extracted pdf text");
        Ok(text.trim().to_string())
    })
    .await
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EnrichError::Io {
            path: PathBuf::new(),
            source: std::io::Error::other(e),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn csv_records_are_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.csv");
        std::fs::write(&path, "Product,Price\nWidget,9.99\nGadget,19.99\n").unwrap();

        let records = load_csv_records(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Product"], "Widget");
        assert_eq!(records[1]["Price"], "19.99");
    }

    #[tokio::test]
    async fn missing_csv_is_io_error() {
        let err = load_csv_records(Path::new("/no/such/file.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::Io { .. }));
    }

    #[tokio::test]
    async fn garbage_pdf_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();

        let err = extract_pdf_text(&path).await.unwrap_err();
        assert!(matches!(err, EnrichError::Parse { .. }));
    }
}

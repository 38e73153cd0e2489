//! Job files: the structured parameters of one enrichment run.
//!
//! ```toml
//! input = "companies.csv"
//! output = "companies_enriched.csv"
//! batch_size = 10
//! required_columns = ["Name", "URL"]
//!
//! [[fields]]
//! name = "Summary"
//! description = "one sentence about the company"
//!
//! [external_data]
//! "Target Market" = "EU manufacturing"
//!
//! [[steps]]
//! kind = "scrape_url_content"
//! urls = { field = "URL" }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use table_enrich_shared::{
    DefaultsConfig, EnrichError, ExternalData, FieldSchema, GlobalContext, Result,
};
use table_enrich_sources::ScrapeOptions;
use table_enrich_table::CheckpointMode;

use crate::pipeline::EnrichConfig;
use crate::steps::Step;

/// On-disk job description. Unset options fall back to the app config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    pub input: PathBuf,
    pub output: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_marker: Option<String>,

    #[serde(default)]
    pub checkpoint: CheckpointMode,

    /// Leave rows whose schema fields are already filled untouched.
    #[serde(default = "default_true")]
    pub skip_completed: bool,

    /// Columns that must exist, and be non-empty for a row to be sent.
    #[serde(default)]
    pub required_columns: Vec<String>,

    pub fields: FieldSchema,

    #[serde(default)]
    pub external_data: ExternalData,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Permit scraping loopback and private-network hosts.
    #[serde(default)]
    pub allow_private_hosts: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl JobFile {
    /// Read and parse a job file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EnrichError::io(path, e))?;
        let job: Self = toml::from_str(&content)
            .map_err(|e| EnrichError::config(format!("invalid job file {}: {e}", path.display())))?;
        debug!(path = %path.display(), fields = job.fields.len(), steps = job.steps.len(), "loaded job file");
        Ok(job)
    }

    /// Resolve against the app defaults.
    pub fn into_config(self, defaults: &DefaultsConfig) -> EnrichConfig {
        let scrape = ScrapeOptions {
            allow_private_hosts: self.allow_private_hosts,
            timeout_secs: self
                .scrape_timeout_secs
                .unwrap_or(ScrapeOptions::default().timeout_secs),
        };

        EnrichConfig {
            input: self.input,
            output: self.output,
            model: self.model.unwrap_or_else(|| defaults.model.clone()),
            schema: self.fields,
            required_columns: self.required_columns,
            global: GlobalContext::new(self.external_data),
            steps: self.steps,
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            max_workers: self.max_workers.unwrap_or(defaults.max_workers),
            failure_marker: self
                .failure_marker
                .unwrap_or_else(|| defaults.failure_marker.clone()),
            checkpoint: self.checkpoint,
            skip_completed: self.skip_completed,
            scrape,
        }
    }
}

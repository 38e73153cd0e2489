//! Enrichment engine for table-enrich.
//!
//! This crate ties together schema validation, per-row data-gathering steps,
//! prompt construction and the model client into the batch pipeline
//! ([`pipeline::enrich_table`]).

pub mod client;
pub mod job;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod steps;

pub use client::{EnrichmentClient, EnrichmentResult, GeminiClient, GenerativeModel};
pub use job::JobFile;
pub use pipeline::{
    EnrichConfig, EnrichSummary, ProgressReporter, RowState, SilentProgress, enrich_table, run_job,
};
pub use steps::{ParamValue, Step, StepRunner};

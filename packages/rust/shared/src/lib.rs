//! Shared types, error model, and configuration for table-enrich.
//!
//! This crate is the foundation depended on by all other table-enrich crates.
//! It provides:
//! - [`EnrichError`]: the unified error type
//! - Domain types ([`Row`], [`Table`], [`FieldSchema`], [`GlobalContext`], [`RowContext`])
//! - Configuration ([`AppConfig`], [`RetryConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, GeminiConfig, RetryConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, read_api_key,
};
pub use error::{EnrichError, Result};
pub use types::{ExternalData, FieldSchema, FieldSpec, GlobalContext, Row, RowContext, Table};

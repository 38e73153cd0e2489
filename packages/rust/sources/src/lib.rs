//! External data sources used by enrichment steps.
//!
//! This crate provides:
//! - [`Fetcher`]: HTTP page fetching, visible-text extraction and
//!   sitemap-based sub-page discovery
//! - [`files`]: local CSV and PDF ingestion

mod fetch;
pub mod files;
mod sitemap;

pub use fetch::{Fetcher, ScrapeOptions, text_from_html};
pub use files::{extract_pdf_text, load_csv_records};
pub use sitemap::{SitemapDoc, parse_sitemap};

//! Error types for table-enrich.
//!
//! Library crates use [`EnrichError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all table-enrich operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// Configuration loading or validation error (missing credential, bad step reference).
    #[error("config error: {message}")]
    Config { message: String },

    /// A required column is structurally absent from the table.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Network/HTTP error while gathering external data.
    #[error("network error: {0}")]
    Network(String),

    /// HTML, XML, CSV or PDF content could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A data-gathering step failed for one row.
    #[error("step `{step}` failed: {message}")]
    Step { step: String, message: String },

    /// Retryable model API failure (rate limit, timeout, malformed response).
    #[error("transient API error: {0}")]
    ApiTransient(String),

    /// Non-retryable model API failure (auth, quota, invalid model). Aborts the run.
    #[error("fatal API error: {0}")]
    ApiFatal(String),

    /// Transient failures persisted past the retry budget.
    #[error("API request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// CSV reading or writing error.
    #[error("csv error: {0}")]
    Csv(String),

    /// Data validation error (duplicate columns, invalid parameters, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnrichError>;

impl EnrichError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a schema error from any displayable message.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a step error for the named step.
    pub fn step(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a model call that failed with this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ApiTransient(_))
    }

    /// Whether this error must abort the whole enrichment run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ApiFatal(_) | Self::Config { .. } | Self::Schema { .. }
        )
    }
}

impl From<csv::Error> for EnrichError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = EnrichError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = EnrichError::schema("column `URL` not found");
        assert!(err.to_string().contains("`URL`"));

        let err = EnrichError::step("scrape_url_content", "timed out");
        assert_eq!(
            err.to_string(),
            "step `scrape_url_content` failed: timed out"
        );
    }

    #[test]
    fn transient_and_fatal_classification() {
        assert!(EnrichError::ApiTransient("429".into()).is_transient());
        assert!(!EnrichError::ApiFatal("401".into()).is_transient());
        assert!(EnrichError::ApiFatal("401".into()).is_fatal());
        assert!(EnrichError::config("no key").is_fatal());
        assert!(!EnrichError::Network("down".into()).is_fatal());
        assert!(
            !EnrichError::RetriesExhausted {
                attempts: 5,
                last: "429".into()
            }
            .is_fatal()
        );
    }
}

//! Per-row external data gathering.
//!
//! A [`Step`] is a named variant with a fixed parameter shape. Parameters are
//! [`ParamValue`]s, resolved against the current row (or data gathered by an
//! earlier step) right before the step runs. Steps execute in declared order
//! and each writes one key of the row's [`RowContext`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use table_enrich_shared::{EnrichError, GlobalContext, Result, Row, RowContext};
use table_enrich_sources::{Fetcher, extract_pdf_text, load_csv_records};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A step parameter: a literal, or a selector resolved per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    /// A fixed string.
    Literal(String),
    /// A fixed list of strings.
    Literals(Vec<String>),
    /// The value of this column in the current row.
    Field(String),
    /// A key written by an earlier step (or present in the global context).
    External(String),
}

/// A parameter after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    One(String),
    Many(Vec<String>),
}

impl Resolved {
    fn into_one(self, step: &str) -> Result<String> {
        match self {
            Self::One(s) => Ok(s),
            Self::Many(mut v) if v.len() == 1 => Ok(v.remove(0)),
            Self::Many(v) => Err(EnrichError::step(
                step,
                format!("expected a single value, got a list of {}", v.len()),
            )),
        }
    }
}

impl ParamValue {
    /// Resolve against the row and the data gathered so far.
    pub fn resolve(
        &self,
        step: &str,
        row: &Row,
        ctx: &RowContext,
        global: &GlobalContext,
    ) -> Result<Resolved> {
        match self {
            Self::Literal(s) => Ok(Resolved::One(s.clone())),
            Self::Literals(v) => Ok(Resolved::Many(v.clone())),
            Self::Field(col) => row
                .value(col)
                .map(|v| Resolved::One(v.trim().to_string()))
                .ok_or_else(|| EnrichError::step(step, format!("column `{col}` is empty"))),
            Self::External(key) => {
                let value = ctx.get(key).or_else(|| global.get(key)).ok_or_else(|| {
                    EnrichError::step(step, format!("external data `{key}` is not set"))
                })?;
                value_to_strings(value).ok_or_else(|| {
                    EnrichError::step(step, format!("external data `{key}` is not text"))
                })
            }
        }
    }
}

fn value_to_strings(value: &Value) -> Option<Resolved> {
    match value {
        Value::String(s) => Some(Resolved::One(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(Resolved::Many),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Step registry
// ---------------------------------------------------------------------------

/// A configured data-gathering step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Visible text of one page, or of each page in a list.
    ScrapeUrlContent {
        urls: ParamValue,
        /// Only the first `max_pages` URLs of a list are fetched.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_pages: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Page URLs listed in the site's sitemaps.
    FindSubPages {
        base_url: ParamValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Rows of a local CSV file, as a list of objects.
    LoadCsv {
        path: ParamValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Plain text of a local PDF file.
    ExtractPdfText {
        path: ParamValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

impl Step {
    /// Registry name of the step kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScrapeUrlContent { .. } => "scrape_url_content",
            Self::FindSubPages { .. } => "find_sub_pages",
            Self::LoadCsv { .. } => "load_csv",
            Self::ExtractPdfText { .. } => "extract_pdf_text",
        }
    }

    /// External-data key this step writes.
    pub fn key(&self) -> &str {
        let (custom, default) = match self {
            Self::ScrapeUrlContent { key, .. } => (key, "URL Content"),
            Self::FindSubPages { key, .. } => (key, "Sub Pages"),
            Self::LoadCsv { key, .. } => (key, "CSV Data"),
            Self::ExtractPdfText { key, .. } => (key, "PDF Text"),
        };
        custom.as_deref().unwrap_or(default)
    }

    fn params(&self) -> &ParamValue {
        match self {
            Self::ScrapeUrlContent { urls, .. } => urls,
            Self::FindSubPages { base_url, .. } => base_url,
            Self::LoadCsv { path, .. } | Self::ExtractPdfText { path, .. } => path,
        }
    }

    /// Value stored under [`Step::key`] when the step fails.
    fn empty_value(&self, resolved: Option<&Resolved>) -> Value {
        match self {
            Self::ScrapeUrlContent { .. } => match resolved {
                Some(Resolved::Many(urls)) => {
                    Value::Array(urls.iter().map(|_| Value::String(String::new())).collect())
                }
                _ => Value::String(String::new()),
            },
            Self::FindSubPages { .. } | Self::LoadCsv { .. } => Value::Array(Vec::new()),
            Self::ExtractPdfText { .. } => Value::String(String::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes the configured steps for one row at a time.
///
/// Shared read-only across row tasks; all per-row state lives in the
/// [`RowContext`] returned by [`StepRunner::run`].
#[derive(Debug, Clone)]
pub struct StepRunner {
    steps: Vec<Step>,
    fetcher: Fetcher,
}

impl StepRunner {
    pub fn new(steps: Vec<Step>, fetcher: Fetcher) -> Self {
        Self { steps, fetcher }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Check every step reference before any row is processed.
    ///
    /// `Field` selectors must name an existing column; `External` selectors
    /// must name a global key or a key written by an earlier step.
    pub fn validate(&self, columns: &[String], global: &GlobalContext) -> Result<()> {
        let mut produced: Vec<&str> = Vec::new();
        for (i, step) in self.steps.iter().enumerate() {
            match step.params() {
                ParamValue::Field(col) if !columns.contains(col) => {
                    return Err(EnrichError::config(format!(
                        "step #{} ({}) references unknown column `{col}`",
                        i + 1,
                        step.name()
                    )));
                }
                ParamValue::External(key)
                    if !produced.contains(&key.as_str()) && global.get(key).is_none() =>
                {
                    return Err(EnrichError::config(format!(
                        "step #{} ({}) reads `{key}`, which no earlier step writes",
                        i + 1,
                        step.name()
                    )));
                }
                _ => {}
            }
            produced.push(step.key());
        }
        Ok(())
    }

    /// Run all steps for `row`. Never fails: a failing step is logged and
    /// leaves an empty value under its key.
    pub async fn run(&self, row: &Row, global: &GlobalContext) -> RowContext {
        let mut ctx = RowContext::new();

        for step in &self.steps {
            let value = match step.params().resolve(step.name(), row, &ctx, global) {
                Ok(params) => match self.execute(step, params.clone()).await {
                    Ok(value) => {
                        debug!(step = step.name(), key = step.key(), "step completed");
                        value
                    }
                    Err(e) => {
                        warn!(step = step.name(), key = step.key(), error = %e, "step failed");
                        step.empty_value(Some(&params))
                    }
                },
                Err(e) => {
                    warn!(step = step.name(), key = step.key(), error = %e, "step skipped");
                    step.empty_value(None)
                }
            };
            ctx.insert(step.key(), value);
        }

        ctx
    }

    async fn execute(&self, step: &Step, params: Resolved) -> Result<Value> {
        let name = step.name();
        match step {
            Step::ScrapeUrlContent { max_pages, .. } => match params {
                Resolved::One(url) => Ok(Value::String(self.fetcher.text_content(&url).await?)),
                Resolved::Many(urls) => {
                    let limit = max_pages.unwrap_or(urls.len());
                    let mut texts = Vec::with_capacity(limit.min(urls.len()));
                    for url in urls.iter().take(limit) {
                        let text = match self.fetcher.text_content(url).await {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(step = name, %url, error = %e, "page scrape failed");
                                String::new()
                            }
                        };
                        texts.push(Value::String(text));
                    }
                    Ok(Value::Array(texts))
                }
            },
            Step::FindSubPages { .. } => {
                let base = params.into_one(name)?;
                let pages = self.fetcher.sub_pages(&base).await?;
                Ok(Value::Array(pages.into_iter().map(Value::String).collect()))
            }
            Step::LoadCsv { .. } => {
                let path = params.into_one(name)?;
                Ok(Value::Array(load_csv_records(Path::new(&path)).await?))
            }
            Step::ExtractPdfText { .. } => {
                let path = params.into_one(name)?;
                Ok(Value::String(extract_pdf_text(Path::new(&path)).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use table_enrich_shared::ExternalData;
    use table_enrich_sources::ScrapeOptions;

    fn runner(steps: Vec<Step>) -> StepRunner {
        let fetcher = Fetcher::new(&ScrapeOptions {
            timeout_secs: 5,
            allow_private_hosts: true,
        })
        .unwrap();
        StepRunner::new(steps, fetcher)
    }

    #[test]
    fn steps_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            steps: Vec<Step>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
[[steps]]
kind = "find_sub_pages"
base_url = { field = "Website" }

[[steps]]
kind = "scrape_url_content"
urls = { external = "Sub Pages" }
max_pages = 3
key = "Site Text"

[[steps]]
kind = "load_csv"
path = { literal = "data/products.csv" }
"#,
        )
        .unwrap();

        assert_eq!(parsed.steps.len(), 3);
        assert_eq!(parsed.steps[0].key(), "Sub Pages");
        assert_eq!(parsed.steps[1].key(), "Site Text");
        assert_eq!(parsed.steps[2].name(), "load_csv");
        assert_eq!(
            parsed.steps[1],
            Step::ScrapeUrlContent {
                urls: ParamValue::External("Sub Pages".into()),
                max_pages: Some(3),
                key: Some("Site Text".into()),
            }
        );
    }

    #[test]
    fn unknown_step_kind_is_rejected() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Wrapper {
            steps: Vec<Step>,
        }
        let result: std::result::Result<Wrapper, _> =
            toml::from_str("[[steps]]\nkind = \"eval_python\"\ncode = { literal = \"x\" }\n");
        assert!(result.is_err());
    }

    #[test]
    fn field_selector_resolves_from_row() {
        let row = Row::from_pairs([("URL", " https://acme.test "), ("Empty", "")]);
        let ctx = RowContext::new();
        let global = GlobalContext::default();

        let resolved = ParamValue::Field("URL".into())
            .resolve("s", &row, &ctx, &global)
            .unwrap();
        assert_eq!(resolved, Resolved::One("https://acme.test".into()));

        assert!(
            ParamValue::Field("Empty".into())
                .resolve("s", &row, &ctx, &global)
                .is_err()
        );
    }

    #[test]
    fn validate_rejects_unknown_column_and_forward_reference() {
        let columns = vec!["Name".to_string(), "URL".to_string()];
        let global = GlobalContext::default();

        let bad_column = runner(vec![Step::ScrapeUrlContent {
            urls: ParamValue::Field("Website".into()),
            max_pages: None,
            key: None,
        }]);
        let err = bad_column.validate(&columns, &global).unwrap_err();
        assert!(matches!(err, EnrichError::Config { .. }));
        assert!(err.to_string().contains("`Website`"));

        let forward = runner(vec![
            Step::ScrapeUrlContent {
                urls: ParamValue::External("Sub Pages".into()),
                max_pages: None,
                key: None,
            },
            Step::FindSubPages {
                base_url: ParamValue::Field("URL".into()),
                key: None,
            },
        ]);
        assert!(forward.validate(&columns, &global).is_err());

        let ordered = runner(vec![
            Step::FindSubPages {
                base_url: ParamValue::Field("URL".into()),
                key: None,
            },
            Step::ScrapeUrlContent {
                urls: ParamValue::External("Sub Pages".into()),
                max_pages: None,
                key: None,
            },
        ]);
        assert!(ordered.validate(&columns, &global).is_ok());
    }

    #[tokio::test]
    async fn failing_step_does_not_stop_later_steps() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/about"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>We sell anvils.</p></body></html>"),
            )
            .mount(&server)
            .await;

        let steps = vec![
            // No sitemap on the mock server: this step fails.
            Step::FindSubPages {
                base_url: ParamValue::Field("URL".into()),
                key: None,
            },
            Step::ScrapeUrlContent {
                urls: ParamValue::Literals(vec![
                    format!("{}/about", server.uri()),
                    format!("{}/missing", server.uri()),
                ]),
                max_pages: None,
                key: None,
            },
        ];

        let row = Row::from_pairs([("URL", server.uri())]);
        let ctx = runner(steps).run(&row, &GlobalContext::default()).await;

        assert_eq!(ctx.get("Sub Pages"), Some(&json!([])));
        assert_eq!(ctx.get("URL Content"), Some(&json!(["We sell anvils.", ""])));
    }

    #[tokio::test]
    async fn unreachable_url_leaves_empty_sentinel() {
        let steps = vec![Step::ScrapeUrlContent {
            urls: ParamValue::Field("URL".into()),
            max_pages: None,
            key: None,
        }];
        // Port 9 (discard) on loopback: connection refused.
        let row = Row::from_pairs([("URL", "http://127.0.0.1:9/")]);
        let ctx = runner(steps).run(&row, &GlobalContext::default()).await;
        assert_eq!(ctx.get("URL Content"), Some(&json!("")));
    }

    #[tokio::test]
    async fn external_selector_reads_global_context() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("catalog.csv");
        std::fs::write(&csv_path, "Sku,Name\n1,Anvil\n").unwrap();

        let mut data = ExternalData::new();
        data.insert(
            "Catalog Path".into(),
            json!(csv_path.to_string_lossy().to_string()),
        );
        let global = GlobalContext::new(data);

        let steps = vec![Step::LoadCsv {
            path: ParamValue::External("Catalog Path".into()),
            key: None,
        }];
        let ctx = runner(steps).run(&Row::new(), &global).await;
        assert_eq!(ctx.get("CSV Data"), Some(&json!([{"Sku": "1", "Name": "Anvil"}])));
    }
}

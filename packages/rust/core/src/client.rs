//! Generative model access: the Gemini REST client, response parsing, and
//! the retrying enrichment client used by row tasks.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use table_enrich_shared::{EnrichError, FieldSchema, GeminiConfig, Result, RetryConfig};

// ---------------------------------------------------------------------------
// Model seam
// ---------------------------------------------------------------------------

/// Something that turns a prompt into model text.
///
/// Implementations classify failures: [`EnrichError::ApiTransient`] is
/// retried, [`EnrichError::ApiFatal`] aborts the run.
pub trait GenerativeModel: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Send `prompt` and return the raw response text.
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    /// Build a client. `model` may be given with or without the `models/` prefix.
    pub fn new(api_key: String, model: &str, config: &GeminiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EnrichError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.trim_start_matches("models/").to_string(),
        })
    }

    /// Models that support `generateContent`, as `models/<id>` names.
    #[instrument(skip(self))]
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/models", self.base_url))
                .header("x-goog-api-key", &self.api_key)
                .query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let body = self.send(request).await?;
            if let Some(models) = body["models"].as_array() {
                for model in models {
                    let supports = model["supportedGenerationMethods"]
                        .as_array()
                        .is_some_and(|m| m.iter().any(|v| v == "generateContent"));
                    if let (true, Some(name)) = (supports, model["name"].as_str()) {
                        names.push(name.to_string());
                    }
                }
            }

            match body["nextPageToken"].as_str() {
                Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(names)
    }

    /// Send a request and decode the JSON body, classifying failures.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                EnrichError::ApiTransient(format!("request failed: {e}"))
            } else {
                EnrichError::ApiFatal(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EnrichError::ApiTransient(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| EnrichError::ApiTransient(format!("response is not JSON: {e}")))
    }
}

impl GenerativeModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        let request = self
            .http
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let response = self.send(request).await?;
        candidate_text(&response)
    }
}

/// Map an HTTP error status to a transient or fatal error.
fn classify_status(status: StatusCode, body: &str) -> EnrichError {
    let detail: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = detail["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect());
    let msg = format!("HTTP {status}: {message}");

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => EnrichError::ApiTransient(msg),
        s if s.is_server_error() => EnrichError::ApiTransient(msg),
        // 400 (bad key / bad request), 401, 403 (permission, quota), 404 (unknown model)
        _ => EnrichError::ApiFatal(msg),
    }
}

/// Concatenated text parts of the first candidate.
fn candidate_text(response: &Value) -> Result<String> {
    if let Some(reason) = response["promptFeedback"]["blockReason"].as_str() {
        return Err(EnrichError::ApiTransient(format!("prompt blocked: {reason}")));
    }

    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| EnrichError::ApiTransient("response has no candidates".into()))?;

    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.trim().is_empty() {
        return Err(EnrichError::ApiTransient("response candidate is empty".into()));
    }
    Ok(text)
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Field values returned by the model for one row, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentResult {
    values: Vec<(String, String)>,
}

impl EnrichmentResult {
    /// The same `value` for every schema field.
    pub fn filled(schema: &FieldSchema, value: &str) -> Self {
        Self {
            values: schema
                .names()
                .map(|n| (n.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(f, v)| (f.as_str(), v.as_str()))
    }
}

/// Find the first JSON object embedded in model output.
///
/// Handles fenced code blocks, surrounding prose and nested objects.
pub fn extract_json(text: &str) -> Option<serde_json::Map<String, Value>> {
    for (start, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(obj))) = stream.next() {
            return Some(obj);
        }
    }
    None
}

/// Restrict a model response to the schema's keys.
///
/// Missing keys become `""` so the output column shape never changes.
pub fn parse_response(text: &str, schema: &FieldSchema) -> Result<EnrichmentResult> {
    let obj = extract_json(text).ok_or_else(|| {
        EnrichError::ApiTransient(format!(
            "malformed response, no JSON object in: {}",
            text.chars().take(200).collect::<String>()
        ))
    })?;

    let values = schema
        .names()
        .map(|name| {
            let value = obj.get(name).map(value_to_cell).unwrap_or_default();
            (name.to_string(), value)
        })
        .collect();

    Ok(EnrichmentResult { values })
}

/// Flatten a JSON value into a single CSV cell.
fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_cell)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Retrying client
// ---------------------------------------------------------------------------

/// Wraps a [`GenerativeModel`] with parsing and bounded retry/backoff.
#[derive(Debug)]
pub struct EnrichmentClient<M> {
    model: M,
    retry: RetryConfig,
}

impl<M: GenerativeModel> EnrichmentClient<M> {
    pub fn new(model: M, retry: RetryConfig) -> Self {
        Self { model, retry }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Ask the model for the schema fields of one row.
    ///
    /// Transient failures (including unparseable responses) are retried up to
    /// `max_attempts` times; fatal failures return immediately.
    pub async fn enrich(&self, prompt: &str, schema: &FieldSchema) -> Result<EnrichmentResult> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(model = self.model.model_name(), attempt, "calling model");

            let outcome = match self.model.generate(prompt).await {
                Ok(text) => parse_response(&text, schema),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    warn!(attempt, max_attempts, error = %e, "model call failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(EnrichError::RetriesExhausted {
            attempts: max_attempts,
            last: last_error,
        })
    }
}

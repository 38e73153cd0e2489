//! Batch orchestration: rows → steps → prompt → model → checkpointed output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use table_enrich_shared::{
    EnrichError, FieldSchema, GeminiConfig, GlobalContext, Result, RetryConfig, Row, Table,
    read_api_key,
};
use table_enrich_sources::{Fetcher, ScrapeOptions};
use table_enrich_table::{Checkpoint, CheckpointMode, read_csv};

use crate::client::{EnrichmentClient, EnrichmentResult, GeminiClient, GenerativeModel};
use crate::prompt::build_prompt;
use crate::schema::{ensure_schema_columns, is_complete, validate_columns};
use crate::steps::{Step, StepRunner};

/// Fully resolved parameters of one enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Model identifier, e.g. `gemini-1.5-flash`.
    pub model: String,
    pub schema: FieldSchema,
    pub required_columns: Vec<String>,
    pub global: GlobalContext,
    pub steps: Vec<Step>,
    pub batch_size: usize,
    pub max_workers: usize,
    /// Written into every schema column of a failed row.
    pub failure_marker: String,
    pub checkpoint: CheckpointMode,
    pub skip_completed: bool,
    pub scrape: ScrapeOptions,
}

/// Lifecycle of a single row within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Already enriched by an earlier run.
    Skipped,
}

/// Outcome of an enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichSummary {
    pub run_id: Uuid,
    pub total_rows: usize,
    pub enriched: usize,
    pub skipped: usize,
    /// Zero-based indices of rows marked failed.
    pub failed: Vec<usize>,
    pub batches_written: usize,
    pub output: PathBuf,
    pub elapsed: Duration,
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a row reaches a terminal state.
    fn row_finished(&self, index: usize, state: RowState, done: usize, total: usize);
    /// Called after a batch has been checkpointed.
    fn batch_written(&self, batch: usize, batches: usize, rows_written: usize);
    /// Called when the run completes.
    fn done(&self, summary: &EnrichSummary);
    /// Called when the run aborts after rows started.
    fn aborted(&self, error: &EnrichError);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn row_finished(&self, _index: usize, _state: RowState, _done: usize, _total: usize) {}
    fn batch_written(&self, _batch: usize, _batches: usize, _rows_written: usize) {}
    fn done(&self, _summary: &EnrichSummary) {}
    fn aborted(&self, _error: &EnrichError) {}
}

/// Read the API key, load the input table and enrich it with Gemini.
///
/// The output path and the credential are checked before the input is even
/// opened.
#[instrument(skip_all, fields(input = %config.input.display(), model = %config.model))]
pub async fn run_job(
    config: &EnrichConfig,
    gemini: &GeminiConfig,
    retry: &RetryConfig,
    progress: &dyn ProgressReporter,
) -> Result<EnrichSummary> {
    check_output_path(&config.input, &config.output)?;
    let api_key = read_api_key(gemini)?;
    let model = GeminiClient::new(api_key, &config.model, gemini)?;

    progress.phase("Reading input");
    let table = read_csv(&config.input)?;
    info!(rows = table.len(), columns = table.columns().len(), "input loaded");

    enrich_table(table, config, EnrichmentClient::new(model, retry.clone()), progress).await
}

/// Refuse an output that resolves to the input file.
///
/// Checkpoints replace the output with the processed prefix only, so writing
/// over the input would lose every unprocessed row if the run stops early.
fn check_output_path(input: &Path, output: &Path) -> Result<()> {
    let same = match (input.canonicalize(), output.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        return Err(EnrichError::config(format!(
            "output {} would overwrite the input file; choose a different output path",
            output.display()
        )));
    }
    Ok(())
}

/// Everything a row task needs, shared read-only across tasks.
struct RowWorker<M> {
    steps: StepRunner,
    client: EnrichmentClient<M>,
    schema: FieldSchema,
    global: GlobalContext,
    required: Vec<String>,
}

impl<M: GenerativeModel> RowWorker<M> {
    async fn process(&self, index: usize, row: Row) -> Result<EnrichmentResult> {
        if let Some(col) = self.required.iter().find(|c| row.value(c).is_none()) {
            return Err(EnrichError::validation(format!(
                "row {index}: required column `{col}` is empty"
            )));
        }

        let ctx = self.steps.run(&row, &self.global).await;
        let external = ctx.merged_with(&self.global);
        let prompt = build_prompt(&self.schema, &row, &external);
        self.client.enrich(&prompt, &self.schema).await
    }
}

/// Enrich `table` batch by batch, checkpointing to `config.output`.
///
/// Rows within a batch run concurrently on at most `max_workers` tasks; the
/// next batch starts only after the current one is written. A fatal model
/// error aborts the run, leaving the output with every completed batch.
#[instrument(skip_all, fields(rows = table.len(), output = %config.output.display()))]
pub async fn enrich_table<M>(
    mut table: Table,
    config: &EnrichConfig,
    client: EnrichmentClient<M>,
    progress: &dyn ProgressReporter,
) -> Result<EnrichSummary>
where
    M: GenerativeModel + 'static,
{
    let start = Instant::now();
    let run_id = Uuid::now_v7();

    progress.phase("Validating");
    if config.batch_size == 0 || config.max_workers == 0 {
        return Err(EnrichError::config("batch_size and max_workers must be at least 1"));
    }
    if config.schema.is_empty() {
        return Err(EnrichError::config("no fields to enrich"));
    }
    validate_columns(&table, &config.required_columns)?;
    ensure_schema_columns(&mut table, &config.schema);

    let fetcher = Fetcher::new(&config.scrape)?;
    let steps = StepRunner::new(config.steps.clone(), fetcher);
    steps.validate(table.columns(), &config.global)?;

    let worker = Arc::new(RowWorker {
        steps,
        client,
        schema: config.schema.clone(),
        global: config.global.clone(),
        required: config.required_columns.clone(),
    });

    let total = table.len();
    let batches = total.div_ceil(config.batch_size);
    let semaphore = Arc::new(Semaphore::new(config.max_workers));
    let mut checkpoint = Checkpoint::new(&config.output, config.checkpoint);
    let mut states = vec![RowState::Pending; total];
    let mut summary = EnrichSummary {
        run_id,
        total_rows: total,
        enriched: 0,
        skipped: 0,
        failed: Vec::new(),
        batches_written: 0,
        output: config.output.clone(),
        elapsed: Duration::ZERO,
    };
    let mut done = 0usize;

    info!(%run_id, total, batches, batch_size = config.batch_size, max_workers = config.max_workers, "starting enrichment");
    progress.phase("Enriching");

    for batch in 0..batches {
        let begin = batch * config.batch_size;
        let end = (begin + config.batch_size).min(total);
        let mut tasks = JoinSet::new();

        for (index, row) in table.rows().iter().enumerate().take(end).skip(begin) {
            if config.skip_completed && is_complete(row, &config.schema, &config.failure_marker) {
                states[index] = RowState::Skipped;
                summary.skipped += 1;
                done += 1;
                progress.row_finished(index, RowState::Skipped, done, total);
                continue;
            }

            states[index] = RowState::Running;
            let worker = Arc::clone(&worker);
            let semaphore = Arc::clone(&semaphore);
            let row = row.clone();
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => worker.process(index, row).await,
                    Err(e) => Err(EnrichError::validation(format!("worker pool closed: {e}"))),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                // Panicked task; its row is still `Running` and is failed below.
                Err(e) => {
                    error!(error = %e, "row task aborted");
                    continue;
                }
            };

            let state = match outcome {
                Ok(result) => {
                    apply_result(&mut table, index, &result);
                    summary.enriched += 1;
                    RowState::Succeeded
                }
                Err(e) if e.is_fatal() => {
                    error!(row = index, error = %e, "fatal error, aborting run");
                    progress.aborted(&e);
                    // Dropping `tasks` aborts the rest of the batch.
                    return Err(e);
                }
                Err(e) => {
                    warn!(row = index, error = %e, "row failed");
                    mark_failed(&mut table, index, &config.schema, &config.failure_marker);
                    summary.failed.push(index);
                    RowState::Failed
                }
            };
            states[index] = state;
            done += 1;
            progress.row_finished(index, state, done, total);
        }

        for index in begin..end {
            if states[index] == RowState::Running {
                mark_failed(&mut table, index, &config.schema, &config.failure_marker);
                summary.failed.push(index);
                states[index] = RowState::Failed;
                done += 1;
                progress.row_finished(index, RowState::Failed, done, total);
            }
        }

        if let Err(e) = checkpoint.commit(&table, end) {
            error!(batch = batch + 1, error = %e, "checkpoint failed, aborting run");
            progress.aborted(&e);
            return Err(e);
        }
        summary.batches_written += 1;
        info!(batch = batch + 1, batches, rows_written = end, "batch checkpointed");
        progress.batch_written(batch + 1, batches, end);
    }

    if total == 0 {
        checkpoint.commit(&table, 0)?;
    }

    summary.failed.sort_unstable();
    summary.elapsed = start.elapsed();
    info!(
        %run_id,
        enriched = summary.enriched,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "enrichment complete"
    );
    progress.done(&summary);
    Ok(summary)
}

fn apply_result(table: &mut Table, index: usize, result: &EnrichmentResult) {
    if let Some(row) = table.rows_mut().get_mut(index) {
        for (field, value) in result.iter() {
            row.set(field, value);
        }
    }
}

fn mark_failed(table: &mut Table, index: usize, schema: &FieldSchema, marker: &str) {
    apply_result(table, index, &EnrichmentResult::filled(schema, marker));
}

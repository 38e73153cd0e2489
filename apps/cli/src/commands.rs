//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use table_enrich_anonymize::{
    AnonymizeOptions, DEFAULT_ID_COLUMN, DEFAULT_ID_LENGTH, anonymize_rows, de_anonymize_rows,
};
use table_enrich_core::pipeline::{EnrichSummary, ProgressReporter, RowState, run_job};
use table_enrich_core::{GeminiClient, JobFile};
use table_enrich_shared::{AppConfig, EnrichError, init_config, load_config, read_api_key};
use table_enrich_table::CheckpointMode;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// table-enrich: fill table columns with a generative model.
#[derive(Parser)]
#[command(
    name = "table-enrich",
    version,
    about = "Enrich CSV tables row by row with a generative model, with checkpointed batches and reversible anonymization.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run an enrichment job.
    Enrich {
        /// Job file (TOML) with fields, steps and run parameters.
        #[arg(short, long)]
        job: PathBuf,

        /// Override the input CSV.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Override the output CSV.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the model identifier.
        #[arg(short, long)]
        model: Option<String>,

        /// Rows per checkpointed batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Rows processed concurrently.
        #[arg(long)]
        max_workers: Option<usize>,

        /// Checkpoint mode: replace or append.
        #[arg(long)]
        checkpoint: Option<CheckpointMode>,

        /// Re-enrich rows whose fields are already filled.
        #[arg(long)]
        no_skip_completed: bool,
    },

    /// Replace personal columns with a deterministic ID.
    Anonymize {
        /// Source CSV (never modified).
        input: PathBuf,

        /// Anonymized CSV to write.
        output: PathBuf,

        /// Seed mixed into every ID.
        #[arg(long, env = "TABLE_ENRICH_SEED")]
        seed: String,

        /// Personal columns to remove (comma-separated).
        #[arg(long, value_delimiter = ',', required = true)]
        personal: Vec<String>,

        /// Columns hashed into the ID, in order (comma-separated).
        #[arg(long, value_delimiter = ',', required = true)]
        id_fields: Vec<String>,

        /// Prefix prepended to every ID.
        #[arg(long, default_value = "")]
        prefix: String,

        /// Encoded characters kept from the digest.
        #[arg(long, default_value_t = DEFAULT_ID_LENGTH)]
        length: usize,

        /// Name of the ID column.
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        id_column: String,

        /// Also write the source with its ID column here, for de-anonymizing.
        #[arg(long)]
        keyed_copy: Option<PathBuf>,
    },

    /// Restore personal columns by joining on the ID column.
    Deanonymize {
        /// Keyed copy of the source (has the ID column and personal fields).
        #[arg(long)]
        original: PathBuf,

        /// Anonymized (possibly enriched) CSV.
        #[arg(long)]
        anonymized: PathBuf,

        /// Merged CSV to write.
        #[arg(short, long)]
        output: PathBuf,

        /// Personal columns to restore (comma-separated).
        #[arg(long, value_delimiter = ',', required = true)]
        personal: Vec<String>,

        /// Name of the ID column.
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        id_field: String,
    },

    /// List models that support content generation.
    Models,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "table_enrich=info",
        1 => "table_enrich=debug",
        _ => "table_enrich=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Enrich {
            job,
            input,
            output,
            model,
            batch_size,
            max_workers,
            checkpoint,
            no_skip_completed,
        } => {
            let mut job_file = JobFile::load(&job)?;
            if let Some(input) = input {
                job_file.input = input;
            }
            if let Some(output) = output {
                job_file.output = output;
            }
            job_file.model = model.or(job_file.model);
            job_file.batch_size = batch_size.or(job_file.batch_size);
            job_file.max_workers = max_workers.or(job_file.max_workers);
            if let Some(mode) = checkpoint {
                job_file.checkpoint = mode;
            }
            if no_skip_completed {
                job_file.skip_completed = false;
            }
            cmd_enrich(job_file).await
        }
        Command::Anonymize {
            input,
            output,
            seed,
            personal,
            id_fields,
            prefix,
            length,
            id_column,
            keyed_copy,
        } => {
            let options = AnonymizeOptions {
                seed,
                personal_info_fields: personal,
                id_fields,
                prefix,
                length,
                id_column,
                keyed_copy,
            };
            cmd_anonymize(&input, &output, &options)
        }
        Command::Deanonymize {
            original,
            anonymized,
            output,
            personal,
            id_field,
        } => cmd_deanonymize(&original, &anonymized, &output, &personal, &id_field),
        Command::Models => cmd_models().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_enrich(job: JobFile) -> Result<()> {
    let app = load_config()?;
    let config = job.into_config(&app.defaults);

    info!(
        input = %config.input.display(),
        output = %config.output.display(),
        model = %config.model,
        fields = config.schema.len(),
        steps = config.steps.len(),
        "starting enrichment job"
    );

    let reporter = CliProgress::new();
    let summary = run_job(&config, &app.gemini, &app.retry, &reporter).await?;

    println!();
    println!("  Enrichment finished.");
    println!("  Run:      {}", summary.run_id);
    println!("  Rows:     {}", summary.total_rows);
    println!("  Enriched: {}", summary.enriched);
    println!("  Skipped:  {}", summary.skipped);
    println!("  Failed:   {}", summary.failed.len());
    if !summary.failed.is_empty() {
        let shown: Vec<String> = summary.failed.iter().take(20).map(|i| (i + 1).to_string()).collect();
        let more = if summary.failed.len() > shown.len() { ", ..." } else { "" };
        println!("            rows {}{more}", shown.join(", "));
    }
    println!("  Output:   {}", summary.output.display());
    println!("  Time:     {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

fn cmd_anonymize(input: &Path, output: &Path, options: &AnonymizeOptions) -> Result<()> {
    let summary = anonymize_rows(input, output, options)?;

    println!("Anonymized {} rows into {}", summary.rows, output.display());
    if let Some(path) = &options.keyed_copy {
        println!("Keyed copy written to {}", path.display());
    }
    if summary.duplicate_ids > 0 {
        println!(
            "warning: {} rows share an ID with an earlier row; de-anonymizing them is ambiguous",
            summary.duplicate_ids
        );
    }
    Ok(())
}

fn cmd_deanonymize(
    original: &Path,
    anonymized: &Path,
    output: &Path,
    personal: &[String],
    id_field: &str,
) -> Result<()> {
    let summary = de_anonymize_rows(original, anonymized, output, personal, id_field)?;

    println!("Merged {} rows into {}", summary.matched, output.display());
    if summary.unmatched_anonymized > 0 {
        println!(
            "warning: {} anonymized rows had no matching ID and were dropped",
            summary.unmatched_anonymized
        );
    }
    if summary.unmatched_original > 0 {
        println!(
            "note: {} original rows were not present in the anonymized file",
            summary.unmatched_original
        );
    }
    if summary.duplicate_original_ids > 0 {
        println!(
            "warning: {} original rows repeat an earlier ID; the first occurrence was used",
            summary.duplicate_original_ids
        );
    }
    Ok(())
}

async fn cmd_models() -> Result<()> {
    let config = load_config()?;
    let api_key = read_api_key(&config.gemini)?;
    let client = GeminiClient::new(api_key, &config.defaults.model, &config.gemini)?;

    let models = client.list_models().await?;
    if models.is_empty() {
        return Err(eyre!("no models supporting generateContent are available for this key"));
    }
    for model in models {
        println!("{model}");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn row_finished(&self, index: usize, state: RowState, done: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(done as u64);
        if state == RowState::Failed {
            self.bar.println(format!("  row {} failed", index + 1));
        }
    }

    fn batch_written(&self, batch: usize, batches: usize, rows_written: usize) {
        self.bar
            .set_message(format!("batch {batch}/{batches} saved ({rows_written} rows)"));
    }

    fn done(&self, _summary: &EnrichSummary) {
        self.bar.finish_and_clear();
    }

    fn aborted(&self, error: &EnrichError) {
        self.bar.abandon_with_message(format!("aborted: {error}"));
    }
}

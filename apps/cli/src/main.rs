//! table-enrich CLI: fill CSV columns with a generative model, one batch at a
//! time, and anonymize/de-anonymize the tables it works on.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

//! Writes the relay's OpenAPI document, or checks a committed copy for drift.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use survey_relay::router::openapi_document;

#[derive(Parser, Debug)]
#[command(name = "openapi")]
#[command(about = "Generate the survey relay OpenAPI document", long_about = None)]
struct Cli {
    /// Where the document is written, or read from with --check
    #[arg(default_value = "openapi.json")]
    output: PathBuf,

    /// Fail if the file on disk differs from the generated document
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let json = openapi_document()
        .to_pretty_json()
        .context("Failed to serialize OpenAPI document")?;

    if cli.check {
        let existing = std::fs::read_to_string(&cli.output)
            .with_context(|| format!("Failed to read {}", cli.output.display()))?;
        if existing.trim_end() != json.trim_end() {
            bail!(
                "{} is out of date; rerun without --check to regenerate",
                cli.output.display()
            );
        }
        println!("{} is up to date", cli.output.display());
        return Ok(());
    }

    std::fs::write(&cli.output, json)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;
    println!("OpenAPI document written to {}", cli.output.display());
    Ok(())
}

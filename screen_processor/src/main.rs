use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use screen_processor::analysis::plots::{ImageFormat, PlotConfig};
use screen_processor::config::ExperimentConfig;
use screen_processor::pipeline::run_experiment;

/// Process pooled CRISPR screen counts into phenotype and gene tables.
#[derive(Parser, Debug)]
#[command(name = "screen_processor", version, about)]
struct Args {
    /// Experiment config (JSON)
    config: PathBuf,

    /// Figure format: png, svg, or off
    #[arg(long, default_value = "png")]
    plot_extension: String,

    /// Seed for pseudogene sampling; overrides random_seed in the config
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ExperimentConfig::load(&args.config)
        .with_context(|| format!("could not read {}", args.config.display()))?;
    let mut params = config.validate().context("invalid experiment config")?;
    if args.seed.is_some() {
        params.random_seed = args.seed;
    }

    let plots = ImageFormat::parse_optional(&args.plot_extension)?
        .map(|format| PlotConfig::new(params.plot_directory(), format));

    let summary = run_experiment(&params, plots.as_ref())
        .with_context(|| format!("processing {} failed", params.experiment_name))?;

    info!(
        "{} guides, {} phenotype columns, {} gene rows ({} pseudogene guides)",
        summary.guides, summary.phenotype_columns, summary.gene_rows, summary.pseudogene_guides
    );
    for table in &summary.tables {
        info!("wrote {}", table.display());
    }
    Ok(())
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AnalysisConfig;
use crate::data_handling::count_table::CountTableFile;
use crate::models::{Dataset, NormMethod};
use crate::pipeline::run_analysis;
use crate::rra_processing::RraExecutable;

mod aggregation;
mod analysis;
mod config;
mod data_handling;
mod error;
mod helper_functions;
mod models;
mod pipeline;
mod rra_processing;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliNormMethod {
    /// No normalization
    None,
    /// Median of ratios
    Median,
    /// Total read count
    Total,
}

impl From<CliNormMethod> for NormMethod {
    fn from(method: CliNormMethod) -> Self {
        match method {
            CliNormMethod::None => NormMethod::None,
            CliNormMethod::Median => NormMethod::Median,
            CliNormMethod::Total => NormMethod::Total,
        }
    }
}

/// Gene ranking of iBAR (or plain sgRNA) CRISPR screens
#[derive(Parser, Debug)]
#[command(name = "mageck-ibar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration; flags given on the command line take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Count table (.csv, .tsv or .txt)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Control sample columns, comma separated
    #[arg(short, long, value_delimiter = ',')]
    control: Vec<String>,

    /// Treatment sample columns, comma separated
    #[arg(short, long, value_delimiter = ',')]
    treatment: Vec<String>,

    /// Prefix of all output files
    #[arg(short, long)]
    output_prefix: Option<String>,

    #[arg(long)]
    gene_column: Option<String>,

    #[arg(long)]
    guide_column: Option<String>,

    #[arg(long)]
    barcode_column: Option<String>,

    /// Rows are plain guides without barcodes
    #[arg(long)]
    no_barcode: bool,

    #[arg(long, value_enum)]
    norm_method: Option<CliNormMethod>,

    /// Normalized count a replicate must exceed to count as reliable
    #[arg(long)]
    norm_threshold: Option<f64>,

    /// P-value cutoff used to derive the RRA percentile
    #[arg(long)]
    gene_test_threshold: Option<f64>,

    /// Aggregate barcodes into guides, then guides into genes
    #[arg(long)]
    two_stage: bool,

    /// RRA executable, a name on PATH or a path
    #[arg(long)]
    rra_path: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_json_file(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };

        if let Some(input) = self.input {
            config.input = input;
        }
        if !self.control.is_empty() {
            config.controls = self.control;
        }
        if !self.treatment.is_empty() {
            config.treatments = self.treatment;
        }
        if let Some(prefix) = self.output_prefix {
            config.output_prefix = prefix;
        }
        if let Some(column) = self.gene_column {
            config.gene_column = column;
        }
        if let Some(column) = self.guide_column {
            config.guide_column = column;
        }
        if let Some(column) = self.barcode_column {
            config.barcode_column = column;
        }
        if self.no_barcode {
            config.has_barcode = false;
        }
        if let Some(method) = self.norm_method {
            config.norm_method = method.into();
        }
        if let Some(threshold) = self.norm_threshold {
            config.norm_threshold = threshold;
        }
        if let Some(threshold) = self.gene_test_threshold {
            config.gene_test_threshold = threshold;
        }
        if self.two_stage {
            config.two_stage = true;
        }
        if let Some(rra) = self.rra_path {
            config.rra_path = rra;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.into_config()?;
    config.validate().context("Invalid analysis configuration")?;
    info!("Starting iBAR analysis of {}", config.input.display());

    let rra = RraExecutable::locate(&config.rra_path, config.output_files())?;
    let counts = CountTableFile::from_config(&config)
        .load()
        .with_context(|| format!("Failed to load count table {}", config.input.display()))?;

    let outcome = run_analysis(&counts, &config, &rra).context("Analysis failed")?;
    info!(
        "Finished: {} rows scored, {} aggregation level(s), {} genes ranked (Var = Mean + {:.2} * Mean ^ {:.2})",
        outcome.scores.height(),
        outcome.levels.len(),
        outcome.result.height(),
        outcome.model.alpha(),
        outcome.model.k
    );
    Ok(())
}

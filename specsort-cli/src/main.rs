//! specsort CLI
//!
//! Sorts GEANT4 gamma-array simulation output into per-crystal spectra.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};
use log::{info, warn};
use specsort_core::{HistogramSink, NormalSampler, SortConfig, SortStatistics};
use specsort_io::{
    sort_file, sort_parallel, InputScanner, MappedFileReader, OutputFormat, ParallelConfig,
    SpectrumFileSink,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    SpecsortIo(#[from] specsort_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] specsort_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sorts gamma-array simulation output into energy spectra.
#[derive(Parser)]
#[command(name = "specsort")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort a simulation output file into spectra
    Sort {
        /// Simulation output file
        input: PathBuf,

        /// Output file; the extension selects the format (csv, bin, json, h5)
        #[arg(short, long, default_value = "ValidationOut.csv")]
        output: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed for the resolution model (random if omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Sort event-aligned shards in parallel
        #[arg(long)]
        parallel: bool,

        /// Target shard size in MiB for --parallel
        #[arg(long, default_value = "16")]
        shard_mb: usize,

        /// Worker threads for --parallel (all cores if omitted)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Show line counts of a simulation output file without sorting it
    Info {
        /// Simulation output file
        input: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        /// JSON configuration file to load and validate
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<SortConfig> {
    let config = match path {
        Some(path) => SortConfig::from_file(path)?,
        None => SortConfig::new(),
    };
    config.validate()?;
    Ok(config)
}

fn output_format(path: &Path) -> OutputFormat {
    OutputFormat::from_path(path).unwrap_or_else(|| {
        warn!(
            "unknown output extension for {}, writing CSV",
            path.display()
        );
        OutputFormat::Csv
    })
}

fn print_summary(stats: &SortStatistics, entries: u64) {
    println!("Lines: {}", stats.lines);
    println!("Skipped lines: {}", stats.skipped_lines);
    println!("Events: {}", stats.events);
    println!("Records: {}", stats.records);
    println!("Malformed lines: {}", stats.parse_errors);
    println!("Out-of-range records: {}", stats.out_of_range);
    println!("Spectrum entries: {}", entries);

    if stats.rejected() > 0 {
        warn!(
            "{} records skipped ({} malformed, {} out of range)",
            stats.rejected(),
            stats.parse_errors,
            stats.out_of_range
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Sort {
            input,
            output,
            config,
            seed,
            parallel,
            shard_mb,
            threads,
        } => {
            let config = load_config(config.as_deref())?;
            let format = output_format(&output);
            let start = Instant::now();

            let (stats, mut sink) = if parallel {
                let seed = seed.unwrap_or_else(rand::random);
                let mut settings = ParallelConfig::new()
                    .with_shard_bytes(shard_mb.saturating_mul(1024 * 1024))
                    .with_seed(seed);
                if let Some(threads) = threads {
                    settings = settings.with_threads(threads);
                }
                info!("parallel sort, seed {}", seed);

                let reader = MappedFileReader::open(&input)?;
                let outcome = sort_parallel(reader.as_bytes(), &config, &settings)?;
                let sink = SpectrumFileSink::with_spectra(&output, format, outcome.spectra);
                (outcome.statistics, sink)
            } else {
                let sampler = match seed {
                    Some(seed) => NormalSampler::seeded(seed),
                    None => NormalSampler::from_entropy(),
                };
                let mut sink = SpectrumFileSink::new(&output, format, &config);
                let stats = sort_file(&input, &config, sampler, &mut sink)?;
                (stats, sink)
            };
            sink.flush()?;

            let elapsed = start.elapsed();
            println!(
                "Sorted {} in {:.2}s",
                input.display(),
                elapsed.as_secs_f64()
            );
            println!("Output: {}", output.display());
            print_summary(&stats, sink.spectra().total_entries());
        }

        Commands::Info {
            input,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let reader = MappedFileReader::open(&input)?;
            let summary = InputScanner::scan(reader.as_bytes(), &config.input);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("File: {}", input.display());
                println!(
                    "Size: {} bytes ({:.2} MB)",
                    reader.len(),
                    reader.len() as f64 / 1_000_000.0
                );
                println!("Lines: {}", summary.lines);
                println!("Header lines: {}", summary.header_lines);
                println!("Event boundaries: {}", summary.boundaries);
                println!("Data lines: {}", summary.records);
                println!("Blank lines: {}", summary.blank_lines);
                println!("Malformed lines: {}", summary.malformed);
            }
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", config.to_json()?);
        }
    }

    Ok(())
}

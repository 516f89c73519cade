//! Command line driver for the photometry pipeline.
//!
//! Works on a store directory laid out as described in `lightcurve::store`:
//! raw frames under `raw/`, observation headers under `metadata/`.
//!
//! - `correct`: background-correct every observation
//! - `apertures`: detect apertures on each new camera/CCD's reference frame
//! - `extract`: append flux samples for every observation
//! - `run`: all three in order
//! - `curve`: print the light curve of one aperture as JSON lines
//!
//! ```bash
//! RUST_LOG=info lightcurve --store /data/sector1 --since 2018-07-25T00:00:00Z run
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lightcurve::pipeline::{BatchSummary, Pipeline, UnitReport};
use lightcurve::store::{DirStore, FluxStore, StoreError};
use lightcurve::PipelineConfig;

fn parse_since(s: &str) -> Result<DateTime<Utc>> {
    let t = DateTime::parse_from_rfc3339(s).with_context(|| format!("not an RFC 3339 time: {s}"))?;
    Ok(t.with_timezone(&Utc))
}

/// Background removal, aperture detection and light curve extraction
#[derive(Parser, Debug)]
#[command(name = "lightcurve")]
#[command(version)]
struct Args {
    /// Store directory
    #[arg(long, global = true, default_value = ".")]
    store: PathBuf,

    /// JSON pipeline config; defaults apply to anything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only process observations taken at or after this RFC 3339 time
    #[arg(long, global = true, value_parser = parse_since)]
    since: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remove sky background and corner glow from raw frames
    Correct,
    /// Detect apertures on reference frames
    Apertures,
    /// Measure catalogued apertures on corrected frames
    Extract,
    /// Correct, detect and extract
    Run,
    /// Print the light curve of one aperture
    Curve {
        /// Aperture label, `<image_id>_<index>`
        label: String,
    },
}

fn print_summary(summary: &BatchSummary) -> Result<()> {
    println!("{} units succeeded, {} failed", summary.succeeded, summary.failed);
    for failure in &summary.failures {
        println!("  {failure}");
    }
    if summary.failed > 0 {
        bail!("{} units failed", summary.failed);
    }
    Ok(())
}

fn summarize(reports: Result<Vec<UnitReport>, StoreError>) -> Result<BatchSummary> {
    let reports = reports.context("failed to list observations")?;
    Ok(BatchSummary::from_reports(&reports))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let store = DirStore::open(&args.store)
        .with_context(|| format!("opening store {}", args.store.display()))?;
    let since = args.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let pipeline = Pipeline::new(config, &store).context("invalid pipeline config")?;

    let summary = match args.command {
        Command::Correct => summarize(pipeline.correct_images(since))?,
        Command::Apertures => summarize(pipeline.detect_apertures(since))?,
        Command::Extract => summarize(pipeline.extract_light_curves(since))?,
        Command::Run => pipeline
            .run_all(since)
            .context("failed to list observations")?,
        Command::Curve { label } => {
            let curve = store
                .light_curve(&label)
                .with_context(|| format!("reading light curve {label}"))?;
            for sample in &curve {
                println!("{}", serde_json::to_string(sample)?);
            }
            return Ok(());
        }
    };
    print_summary(&summary)
}

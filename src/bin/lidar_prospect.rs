//! lidar-prospect CLI
//!
//! Usage:
//!   lidar-prospect status            - Show the readiness of every stage
//!   lidar-prospect download          - Download LiDAR tiles for the AOI
//!   lidar-prospect terrain           - Build the terrain model from the tiles
//!   lidar-prospect derive            - Compute hillshades and sky view factor
//!   lidar-prospect detect            - Run AI anomaly detection
//!   lidar-prospect reset --yes       - Remove every derived artifact

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lidar_prospect::core::state::Stage;
use lidar_prospect::types::{ErrorClass, LidarError, StageStatus};
use lidar_prospect::{Pipeline, PipelineConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lidar-prospect")]
#[command(about = "LiDAR terrain analysis for archaeological prospection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration file
    #[arg(short, long, global = true, env = "LIDAR_PROSPECT_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the readiness of every stage
    Status,
    /// Download LiDAR tiles intersecting the AOI
    Download,
    /// Build the terrain model with PDAL
    Terrain,
    /// Compute hillshades and sky view factor
    Derive,
    /// Detect archaeological anomalies with the generative model
    Detect,
    /// Remove every derived artifact
    Reset {
        /// Confirm removal
        #[arg(long)]
        yes: bool,
    },
}

fn hint(err: &LidarError) -> &'static str {
    match err.class() {
        ErrorClass::Precondition => "run the earlier stages or fix the configuration first",
        ErrorClass::Transient => "this may succeed if you run the stage again",
        ErrorClass::ToolUnavailable => "install the missing tool and retry",
        ErrorClass::DataValidity => "inspect the inputs; re-running may help",
    }
}

fn check_ready(pipeline: &Pipeline, stage: Stage) -> anyhow::Result<()> {
    if let Err(e) = pipeline.state().ensure_ready(stage) {
        bail!("{} is not ready: {} ({})", stage, e, hint(&e));
    }
    Ok(())
}

fn stage_failed(stage: Stage, err: LidarError) -> anyhow::Error {
    let hint = hint(&err);
    anyhow::Error::new(err).context(format!("{} failed ({})", stage, hint))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let pipeline = Pipeline::new(config);

    match cli.command {
        Commands::Status => {
            println!("Area of interest: {} {:?}", pipeline.config().aoi.name, pipeline.config().aoi.bbox);
            print!("{}", pipeline.status());
        }
        Commands::Download => {
            check_ready(&pipeline, Stage::Download)?;
            let report = pipeline.download().await.map_err(|e| stage_failed(Stage::Download, e))?;
            println!(
                "Download {}: {} matched, {} attempted, {} succeeded, {} failed, {} already present, {} not started ({} bytes in {:.1}s)",
                report.status(),
                report.matched,
                report.attempted(),
                report.succeeded(),
                report.failed(),
                report.already_present(),
                report.not_dispatched(),
                report.bytes_downloaded(),
                report.elapsed.as_secs_f64()
            );
            if report.status() == StageStatus::Failed {
                bail!("no tiles available after download");
            }
        }
        Commands::Terrain => {
            check_ready(&pipeline, Stage::TerrainModel)?;
            let path = pipeline.terrain_model().map_err(|e| stage_failed(Stage::TerrainModel, e))?;
            println!("Terrain model written to {}", path.display());
        }
        Commands::Derive => {
            check_ready(&pipeline, Stage::Derivatives)?;
            let report = pipeline.derivatives().map_err(|e| stage_failed(Stage::Derivatives, e))?;
            println!(
                "Derivatives {}: {}/{} hillshades, SVF {}",
                report.status(),
                report.hillshades_succeeded(),
                report.hillshades.len(),
                if report.svf.is_ok() { "ok" } else { "failed" }
            );
            if !report.failed_azimuths().is_empty() {
                println!("Failed azimuths: {:?}", report.failed_azimuths());
            }
            if report.status() == StageStatus::Failed {
                bail!("no derivative was produced");
            }
        }
        Commands::Detect => {
            check_ready(&pipeline, Stage::Detection)?;
            let report = pipeline.detect().await.map_err(|e| stage_failed(Stage::Detection, e))?;
            println!(
                "Detected {} anomalies from {} image(s), {} dropped, written to {}",
                report.collection.len(),
                report.images_sent.len(),
                report.dropped(),
                report.path.display()
            );
            for (category, count) in report.collection.summary() {
                println!("  {:<8} {}", category, count);
            }
            for flag in &report.flags {
                println!("  warning: {}", flag);
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset removes every downloaded and derived artifact; pass --yes to confirm");
            }
            let report = pipeline.reset();
            println!("Removed {} artifact location(s)", report.removed.len());
            for (path, reason) in &report.remaining {
                println!("  could not remove {}: {}", path.display(), reason);
            }
            if !report.is_clean() {
                bail!("reset incomplete");
            }
        }
    }

    Ok(())
}

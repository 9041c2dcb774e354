//! `portwatch` CLI: harbour scenario runs, replays, configuration dump.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fusion_core::config::EngineConfig;
use sim::{load_replay, ReplayRecord, ReplayWriter, RunSummary, Runner, Scenario, ScenarioKind};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "portwatch", about = "Radar/AIS port traffic fusion")]
struct Cli {
    /// Engine configuration file (JSON, partial documents merge over the defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named scenario through the engine and report metrics.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Override the scenario duration (seconds)
        #[arg(long)]
        duration: Option<f64>,
        /// Ground-truth match radius for metrics (metres)
        #[arg(long, default_value_t = sim::DEFAULT_MATCH_RADIUS_M)]
        match_radius: f64,
        /// Write the run summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also record the sensor reports as a replay log
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Feed a recorded replay log through the engine.
    Replay {
        /// Path to a JSON-lines replay log
        input: PathBuf,
        #[arg(long, default_value_t = sim::DEFAULT_MATCH_RADIUS_M)]
        match_radius: f64,
        /// Write the run summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective engine configuration as JSON.
    PrintConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let file_config = cli
        .config
        .as_deref()
        .map(|path| {
            EngineConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))
        })
        .transpose()?;

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            duration,
            match_radius,
            output,
            save_replay,
        } => {
            let mut scenario = Scenario::build(scenario, seed);
            if let Some(d) = duration {
                scenario.duration_secs = d;
            }
            let config = file_config.unwrap_or_else(|| scenario.engine_config());
            let summary = run_scenario(&scenario, config, match_radius, save_replay.as_deref())?;
            report(&summary, output.as_deref())?;
        }
        Commands::Replay {
            input,
            match_radius,
            output,
        } => {
            let records = load_replay(&input)?;
            let config = match file_config {
                Some(config) => config,
                None => config_for_replay(&records),
            };
            println!("Replaying {} ({} records)...", input.display(), records.len());
            let start = Instant::now();
            let summary = sim::run_records(config, records, match_radius)?;
            println!("Replay done, elapsed={:.2}s", start.elapsed().as_secs_f64());
            report(&summary, output.as_deref())?;
        }
        Commands::PrintConfig => {
            let config = file_config.unwrap_or_default();
            println!("{}", config.to_json_pretty()?);
        }
    }

    Ok(())
}

/// Default configuration centred on the replay's radar site.
fn config_for_replay(records: &[ReplayRecord]) -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(ReplayRecord::Header { site, .. }) = records.first() {
        config.origin = site.position;
    }
    config
}

fn run_scenario(
    scenario: &Scenario,
    config: EngineConfig,
    match_radius: f64,
    replay_path: Option<&Path>,
) -> Result<RunSummary> {
    println!(
        "Running scenario '{}' (seed={}, duration={:.0}s, {} vessels)...",
        scenario.name,
        scenario.seed,
        scenario.duration_secs,
        scenario.vessels.len()
    );

    let mut writer = replay_path.map(ReplayWriter::create).transpose()?;
    let mut runner = Runner::new(config, match_radius)?;
    let start = Instant::now();

    for step in scenario.playback()? {
        for record in step {
            if let Some(w) = writer.as_mut() {
                w.write(&record)?;
            }
            runner.feed(record)?;
        }
    }

    println!("Done, elapsed={:.2}s", start.elapsed().as_secs_f64());
    if let (Some(w), Some(path)) = (writer, replay_path) {
        let written = w.written();
        w.finish()?;
        println!("Replay saved to {} ({written} records)", path.display());
    }
    Ok(runner.finish())
}

fn report(summary: &RunSummary, output: Option<&Path>) -> Result<()> {
    let s = &summary.final_stats;
    println!(
        "Cycles: {} ({} partial), mean cycle {:.0} us",
        summary.cycles, summary.partial_cycles, summary.mean_cycle_us
    );
    println!(
        "Targets: {} ({} fused, {} radar-only, {} AIS-only)",
        s.fused_targets, s.fused_count, s.radar_only, s.ais_only
    );
    println!(
        "RMSE: {:.1} m / {:.2} m/s, precision {:.3}, recall {:.3}, fused {:.1}%, id switches {}",
        summary.rmse_position_m,
        summary.rmse_velocity_ms,
        summary.precision,
        summary.recall,
        100.0 * summary.fused_ratio,
        summary.id_switches
    );
    for (kind, n) in &summary.alerts {
        println!("Alerts {kind}: {n}");
    }
    if summary.rejected_reports + summary.malformed > 0 {
        println!(
            "Rejected: {} at normalization, {} at ingestion",
            summary.rejected_reports, summary.malformed
        );
    }

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(summary)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Summary saved to {}", path.display());
    }
    Ok(())
}

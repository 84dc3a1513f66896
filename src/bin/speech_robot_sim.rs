use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use speech_robot::config::AppConfig;
use speech_robot::hal::sim::{compact_compute, compact_config, Noise, SimBoard, Tone, WavSource};
use speech_robot::memory::MemoryLayout;
use speech_robot::pipeline::{run_firmware, IterationReport, RunSummary};
use speech_robot::{init_logging, ErrorCode};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "speech_robot_sim",
    about = "Run the keyword-spotting pipeline on a simulated board"
)]
struct Cli {
    /// Pipeline configuration (defaults to assets/pipeline_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the built-in eight-line test geometry instead of a config file
    #[arg(long, global = true, conflicts_with = "config")]
    compact: bool,
    /// trace, debug, info, warn or error
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control loop and print classifications
    Run {
        /// Feed samples from a WAV file (silence after it ends)
        #[arg(long, conflicts_with_all = ["tone_hz", "noise_seed"])]
        wav: Option<PathBuf>,
        /// Feed a sine tone at this frequency
        #[arg(long, conflicts_with = "noise_seed")]
        tone_hz: Option<f64>,
        /// Feed seeded white noise
        #[arg(long)]
        noise_seed: Option<u64>,
        #[arg(long, default_value_t = 248)]
        iterations: u64,
        /// One JSON object per line instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the planned DRAM regions
    Layout,
    /// Validate the configuration and print the derived geometry
    CheckConfig,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level: Level = cli
        .log_level
        .parse()
        .map_err(|_| anyhow!("invalid log level {:?}", cli.log_level))?;
    init_logging(level);

    let config = load_config(cli.config.as_deref(), cli.compact)?;

    match cli.command {
        Commands::Run {
            wav,
            tone_hz,
            noise_seed,
            iterations,
            json,
        } => run_pipeline(&config, cli.compact, wav, tone_hz, noise_seed, iterations, json),
        Commands::Layout => run_layout(&config),
        Commands::CheckConfig => run_check(&config),
    }
}

fn load_config(path: Option<&Path>, compact: bool) -> Result<AppConfig> {
    if compact {
        return Ok(compact_config());
    }
    match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(AppConfig::load()),
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Output<'a> {
    Iteration(&'a IterationReport),
    Summary(&'a RunSummary),
}

fn run_pipeline(
    config: &AppConfig,
    compact: bool,
    wav: Option<PathBuf>,
    tone_hz: Option<f64>,
    noise_seed: Option<u64>,
    iterations: u64,
    json: bool,
) -> Result<ExitCode> {
    let mut board = SimBoard::new(config);
    if compact {
        board = board.with_compute(compact_compute());
    }
    if let Some(path) = wav {
        let source = WavSource::open(&path).map_err(|err| anyhow!(err.message()))?;
        board = board.with_source(source);
    } else if let Some(hz) = tone_hz {
        board = board.with_source(Tone::new(hz, 0.5));
    } else if let Some(seed) = noise_seed {
        board = board.with_source(Noise::new(seed, 0.5));
    }
    let (board, _handles) = board.build().map_err(|err| anyhow!(err.message()))?;

    let mut write_error = None;
    let mut observer = |report: &IterationReport| {
        if report.classification.is_none() && !report.command_changed {
            return;
        }
        if json {
            match serde_json::to_string(&Output::Iteration(report)) {
                Ok(line) => println!("{}", line),
                Err(err) => write_error = Some(err),
            }
        } else if let Some(result) = &report.classification {
            println!(
                "{:>6} line {:>3}  {:<10} {:.3}{}{}",
                report.iteration,
                report.line,
                result.label,
                result.confidence,
                if result.accepted { "  accepted" } else { "" },
                if report.command_changed { "  -> command" } else { "" }
            );
        }
    };

    let summary = run_firmware(config, board, Some(iterations), &mut observer)
        .map_err(|err| anyhow!("code {}: {}", err.code(), err.message()))?;
    if let Some(err) = write_error {
        return Err(err.into());
    }

    if json {
        println!("{}", serde_json::to_string(&Output::Summary(&summary))?);
    } else {
        let counters = &summary.telemetry.counters;
        println!(
            "{} iterations, {} inferences, {} accepted, {} command changes, {} timing warnings",
            summary.iterations,
            counters.classifications,
            counters.accepted,
            counters.command_changes,
            counters.timing_warnings
        );
        if let Some(label) = &summary.active_command {
            println!("active command: {}", label);
        }
    }
    Ok(ExitCode::from(0))
}

fn run_layout(config: &AppConfig) -> Result<ExitCode> {
    let geometry = config.validate().map_err(|err| anyhow!(err.message()))?;
    let layout = MemoryLayout::plan(&geometry);

    for region in layout.regions() {
        println!(
            "{:<16} {:#010x}..{:#010x} {:>9} bytes",
            region.name,
            region.address,
            region.end(),
            region.len
        );
    }
    println!("total span {:#x}", layout.total_span);
    Ok(ExitCode::from(0))
}

fn run_check(config: &AppConfig) -> Result<ExitCode> {
    let geometry = config.validate().map_err(|err| anyhow!(err.message()))?;
    println!("{}", serde_json::to_string_pretty(&geometry)?);
    Ok(ExitCode::from(0))
}

//! rf-restore: run one restoration job from the command line
//!
//! Usage:
//!   rf-restore process take.wav --mode extreme --format flac -o take_restored.flac
//!   rf-restore models

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use rf_jobs::{
    AudioSource, EngineConfig, JobEvent, JobStatus, ModelState, NoiseProfile, OutputFormat,
    ProcessingMode, RestorationEngine,
};

#[derive(Parser)]
#[command(name = "rf-restore", version, about = "ReelForge audio restoration")]
struct Cli {
    /// Engine config (JSON). Defaults plus RF_RESTORE_* overrides when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model directory override
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore one file
    Process(ProcessArgs),
    /// Show model availability
    Models,
}

#[derive(Args)]
struct ProcessArgs {
    /// Input audio file
    input: PathBuf,
    /// quick, standard or extreme
    #[arg(long)]
    mode: Option<ProcessingMode>,
    /// Denoise strength (0 - 100)
    #[arg(long)]
    denoise: Option<u8>,
    /// High precision processing (true/false)
    #[arg(long)]
    precision: Option<bool>,
    /// Upscale factor (1, 2 or 4)
    #[arg(long)]
    upscale: Option<u8>,
    /// Output sample rate (44100, 48000 or 96000)
    #[arg(long)]
    rate: Option<u32>,
    /// Output channels (1 or 2)
    #[arg(long)]
    channels: Option<usize>,
    /// auto, aggressive or gentle
    #[arg(long)]
    profile: Option<NoiseProfile>,
    /// wav, aiff, flac or mp3
    #[arg(long, default_value = "wav")]
    format: String,
    /// Format quality (e.g. 16, 24, 32f, 320, v2)
    #[arg(long)]
    quality: Option<String>,
    /// Output file (default: <input>_restored.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Give up after this many seconds
    #[arg(long, default_value_t = 3600)]
    timeout: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::from_env()?,
    };
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    let engine = RestorationEngine::new(config)?;

    match cli.command {
        Commands::Process(args) => process(&engine, args),
        Commands::Models => {
            print_models(&engine);
            Ok(())
        }
    }
}

fn process(engine: &RestorationEngine, args: ProcessArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.format, args.quality.as_deref())?;
    let mut config = engine.config().defaults.clone();
    if let Some(mode) = args.mode {
        config = config.mode(mode);
    }
    if let Some(strength) = args.denoise {
        config = config.denoise_strength(strength);
    }
    if let Some(precision) = args.precision {
        config = config.high_precision(precision);
    }
    if let Some(factor) = args.upscale {
        config = config.upscale_factor(factor);
    }
    if let Some(rate) = args.rate {
        config = config.target_sample_rate(rate);
    }
    if let Some(channels) = args.channels {
        config = config.target_channels(channels);
    }
    if let Some(profile) = args.profile {
        config = config.noise_profile(profile);
    }

    let events = engine.events();
    let id = engine.submit(config, AudioSource::File(args.input.clone()))?;
    println!("Job {}", id);

    let deadline = std::time::Instant::now() + Duration::from_secs(args.timeout);
    loop {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(JobEvent::Progress { id: job, stage, progress }) if job == id => {
                println!("  [{:>3}%] {}", progress, stage);
            }
            Ok(JobEvent::Completed { id: job }) | Ok(JobEvent::Failed { id: job, .. }) if job == id => break,
            _ => {}
        }
        if engine.status(&id)?.status.is_terminal() {
            break;
        }
        if std::time::Instant::now() >= deadline {
            bail!("job {} did not finish within {} s", id, args.timeout);
        }
    }

    let job = engine.status(&id)?;
    if job.status != JobStatus::Complete {
        let error = job.error.map(|e| e.message).unwrap_or_default();
        bail!("job {} failed: {}", id, error);
    }
    for report in &job.reports {
        println!(
            "  {:<12} {:<20} {:>6} ms{}",
            report.stage.as_str(),
            report.engine,
            report.elapsed_ms,
            if report.fallback { "  (fallback)" } else { "" }
        );
    }

    let bytes = engine.export_format(&id, &format)?;
    let output = args
        .output
        .unwrap_or_else(|| default_output(&args.input, format.extension()));
    std::fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {} ({}, {} bytes)", output.display(), format, bytes.len());
    Ok(())
}

fn default_output(input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}_restored.{}", stem, extension))
}

fn print_models(engine: &RestorationEngine) {
    println!("Models in {}", engine.registry().model_dir().display());
    for record in engine.models() {
        let state = match (record.state, record.progress) {
            (ModelState::Downloading, Some(p)) => format!("downloading {}%", p),
            (state, _) => format!("{:?}", state).to_lowercase(),
        };
        println!(
            "  {:<10} {:<26} {:<14} {:>4} MB  {}{}",
            record.id.as_str(),
            record.label,
            record.engine,
            record.size_mb,
            state,
            record.error.map(|e| format!(" ({})", e)).unwrap_or_default()
        );
    }
}

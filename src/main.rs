//! Synheart EEG Agent CLI
//!
//! Closed-loop EEG session recording for research.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use synheart_eeg_agent::{
    collector::{CsvReplaySource, SampleSource, CHANNEL_NAMES},
    config::{Config, StopPolicy},
    core::{compute_all, run_session, Classifier, TerminationReason, WindowSegmenter},
    recorder::CsvRecorder,
    transparency::create_shared_log_with_persistence,
    SessionError, VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "synheart-eeg")]
#[command(author = "Synheart")]
#[command(version = VERSION)]
#[command(about = "Closed-loop EEG session recording for research", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session against a recorded stream
    Replay {
        /// CSV file with a header row and `timestamp,ch0,ch1,...` rows
        #[arg(long)]
        input: PathBuf,

        /// Nominal sampling rate of the recording in Hz
        #[arg(long, default_value = "256")]
        rate: f64,

        /// Seed for window duration draws
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after the first epoch instead of consulting the classifier
        #[arg(long)]
        elapsed: bool,

        /// Epoch length in seconds
        #[arg(long)]
        epoch_secs: Option<u64>,
    },

    /// Segment a recording and print one feature vector per window
    Features {
        /// CSV file with a header row and `timestamp,ch0,ch1,...` rows
        #[arg(long)]
        input: PathBuf,

        /// Sampling rate of the recording in Hz
        #[arg(long, default_value = "256")]
        rate: u32,

        /// Seed for window duration draws
        #[arg(long)]
        seed: Option<u64>,

        /// Also classify the windows with the configured artifacts
        #[arg(long)]
        classify: bool,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synheart_eeg_agent=info,synheart_eeg=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            input,
            rate,
            seed,
            elapsed,
            epoch_secs,
        } => cmd_replay(input, rate, seed, elapsed, epoch_secs),
        Commands::Features {
            input,
            rate,
            seed,
            classify,
        } => cmd_features(input, rate, seed, classify),
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

fn cmd_replay(
    input: PathBuf,
    rate: f64,
    seed: Option<u64>,
    elapsed: bool,
    epoch_secs: Option<u64>,
) -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if seed.is_some() {
        config.seed = seed;
    }
    if elapsed {
        config.stop_policy = StopPolicy::Elapsed;
    }
    if let Some(secs) = epoch_secs {
        config.epoch_threshold = Duration::from_secs(secs);
    }
    config
        .ensure_directories()
        .context("creating data directory")?;

    println!("Synheart EEG Agent v{VERSION}");
    println!();
    println!("  Input: {}", input.display());
    println!("  Epoch: {}s", config.epoch_threshold.as_secs());
    println!("  Stop policy: {:?}", config.stop_policy);
    println!("  Output: {}", config.data_path.display());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let source = CsvReplaySource::open(&input, rate)
        .with_context(|| format!("opening {}", input.display()))?;
    let recorder = CsvRecorder::new(
        config.samples_path(),
        config.marks_path(),
        config.channels.headers(),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    ctrlc_handler(shutdown.clone())?;

    let stats = create_shared_log_with_persistence(config.transparency_path());

    match run_session(&config, source, None, recorder, shutdown, stats.clone()) {
        Ok(outcome) => {
            let reason = match outcome.reason {
                TerminationReason::Verdict => "target state reached",
                TerminationReason::EpochElapsed => "epoch elapsed",
                TerminationReason::SessionCap => "session cap reached",
                TerminationReason::Shutdown => "interrupted",
            };
            println!("Session {} stopped: {reason}", outcome.session_id);
            if let Some(evaluation) = &outcome.last_evaluation {
                println!("  Last epoch majority: {}", evaluation.mode);
            }
        }
        // Running out of recording is the normal end of a replay.
        Err(SessionError::SourceUnavailable(msg)) => {
            println!("Replay ended before the session stopped: {msg}");
        }
        Err(e) => return Err(e).context("session failed"),
    }

    println!("  Samples: {}", config.samples_path().display());
    println!("  Marks: {}", config.marks_path().display());
    println!();
    println!("{}", stats.summary());
    let totals = stats.totals();
    println!(
        "All sessions: {} samples accepted, {} epochs evaluated, {} event marks",
        totals.samples_accepted, totals.epochs_evaluated, totals.event_marks
    );
    Ok(())
}

fn cmd_features(input: PathBuf, rate: u32, seed: Option<u64>, classify: bool) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    if rate == 0 {
        bail!("rate must be positive");
    }

    let mut source = CsvReplaySource::open(&input, f64::from(rate))
        .with_context(|| format!("opening {}", input.display()))?;
    let mut buffer = Vec::new();
    loop {
        match source.pull(Duration::ZERO) {
            Ok(Some(sample)) => {
                if let Some(values) = config.channels.select(&sample.channels) {
                    if values.is_finite() {
                        buffer.push(values);
                    }
                }
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => tracing::warn!("skipping row: {e}"),
            Err(_) => break,
        }
    }

    let mut rng = match seed.or(config.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let segmenter = WindowSegmenter::new(
        rate as usize,
        config.min_window_secs,
        config.max_window_secs,
    );
    let windows = segmenter.segment(&buffer, &mut rng);
    let features = compute_all(&windows);

    for vector in &features {
        println!("{}", serde_json::to_string(&vector.to_map())?);
    }
    eprintln!(
        "{} readings, {} windows",
        buffer.len(),
        windows.len()
    );

    if classify {
        let classifier = Classifier::load(
            &config.artifact_dir,
            config.positive_label.clone(),
            config.scaler_policy,
        )
        .context("loading classifier artifacts")?;
        let evaluation = classifier.evaluate(&features)?;
        eprintln!("labels: {:?}", evaluation.labels);
        eprintln!("majority: {} ({:?})", evaluation.mode, evaluation.verdict);
    }

    Ok(())
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Synheart EEG Agent Status");
    println!("=========================");
    println!();

    println!("Configuration:");
    match config.sampling_rate_hz {
        Some(rate) => println!("  Sampling rate: {rate} Hz"),
        None => println!("  Sampling rate: from stream"),
    }
    let montage: Vec<String> = CHANNEL_NAMES
        .iter()
        .zip(config.channels.indices())
        .map(|(name, index)| format!("{name}=ch{index}"))
        .collect();
    println!("  Channels: {}", montage.join(", "));
    println!("  Epoch: {}s", config.epoch_threshold.as_secs());
    match config.session_cap {
        Some(cap) => println!("  Session cap: {}s", cap.as_secs()),
        None => println!("  Session cap: none"),
    }
    println!("  Stop policy: {:?}", config.stop_policy);
    println!(
        "  Windows: {}-{}s",
        config.min_window_secs, config.max_window_secs
    );
    println!(
        "  Artifacts: {} ({})",
        config.artifact_dir.display(),
        if config.artifact_dir.exists() {
            "present"
        } else {
            "missing"
        }
    );
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                for key in [
                    "samples_accepted",
                    "samples_discarded",
                    "epochs_evaluated",
                    "windows_classified",
                    "event_marks",
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {}: {value}", key.replace('_', " "));
                    }
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(shutdown: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}

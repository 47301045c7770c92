//! waveprint - acoustic fingerprinting and identification CLI
//!
//! `register` fingerprints reference audio files into a sqlite index,
//! `identify` recovers the best-aligning reference for a query clip, and
//! `clear` drops the index.
//!
//! Exit codes: 0 success, 1 user error, 2 internal error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use waveprint_core::audio::SymphoniaLoader;
use waveprint_core::timecode::parse_mmss;
use waveprint_core::{
    Algorithm, ChromaParams, Engine, EngineConfig, ExtractorConfig, HashAlgorithm,
    MaximaPairingParams, MatchOutcome, SpectralPatchParams, SqliteIndex, TimeWindow,
};

#[derive(Parser)]
#[command(
    name = "waveprint",
    version,
    about = "Acoustic fingerprinting and identification"
)]
struct Cli {
    /// Fingerprint database path
    #[arg(long, global = true, default_value = "waveprint.db")]
    db: PathBuf,

    /// Maximum parallel extraction workers (0 = one per core)
    #[arg(long, global = true, default_value_t = 0)]
    max_workers: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register reference audio files
    Register {
        #[command(flatten)]
        params: ParamArgs,

        /// Audio files to register
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Identify which registered reference a query clip was drawn from
    Identify {
        #[command(flatten)]
        params: ParamArgs,

        /// Query window start as mm:ss (requires --end)
        #[arg(long)]
        start: Option<String>,

        /// Query window end as mm:ss (requires --start)
        #[arg(long)]
        end: Option<String>,

        /// Query audio file
        file: PathBuf,
    },
    /// Drop every reference and fingerprint from the database
    Clear,
}

/// Extraction parameters; which ones apply depends on --algo.
#[derive(Args)]
struct ParamArgs {
    /// Fingerprinting algorithm: maxima-pairing, spectral-patch or chroma
    #[arg(long, default_value = "maxima-pairing")]
    algo: String,

    /// Target sample rate (Hz)
    #[arg(long, default_value_t = 22050)]
    sample_rate: u32,

    /// STFT window length (samples)
    #[arg(long, default_value_t = 2048)]
    n_fft: usize,

    /// STFT hop (samples)
    #[arg(long, default_value_t = 512)]
    hop_length: usize,

    /// Fingerprint digest: sha1 or sha256
    #[arg(long, default_value = "sha1")]
    hash_algorithm: String,

    /// Peak-picking square side (maxima-pairing)
    #[arg(long, default_value_t = 20)]
    neighborhood_size: usize,

    /// Linear magnitude threshold for peaks (maxima-pairing)
    #[arg(long, default_value_t = 10.0)]
    min_amplitude: f32,

    /// Minimum anchor-target frame delta (maxima-pairing)
    #[arg(long, default_value_t = 5)]
    target_t_min: u32,

    /// Maximum anchor-target frame delta (maxima-pairing)
    #[arg(long, default_value_t = 100)]
    target_t_max: u32,

    /// Maximum |delta f| between anchor and target bins (maxima-pairing)
    #[arg(long, default_value_t = 100)]
    target_f_max_delta: u32,

    /// Square tile side (spectral-patch)
    #[arg(long, default_value_t = 16)]
    patch_size: usize,

    /// Mean-magnitude floor for tile emission (spectral-patch)
    #[arg(long, default_value_t = 1.0)]
    min_patch_energy: f32,

    /// Minimum column-max chroma for emission (chroma)
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,
}

impl ParamArgs {
    fn to_config(&self) -> waveprint_core::Result<ExtractorConfig> {
        let algorithm: Algorithm = self.algo.parse()?;
        let hash_algorithm: HashAlgorithm = self.hash_algorithm.parse()?;

        Ok(match algorithm {
            Algorithm::MaximaPairing => ExtractorConfig::MaximaPairing(MaximaPairingParams {
                sample_rate: self.sample_rate,
                n_fft: self.n_fft,
                hop_length: self.hop_length,
                neighborhood_size: self.neighborhood_size,
                min_amplitude: self.min_amplitude,
                target_t_min: self.target_t_min,
                target_t_max: self.target_t_max,
                target_f_max_delta: self.target_f_max_delta,
                hash_algorithm,
            }),
            Algorithm::SpectralPatch => ExtractorConfig::SpectralPatch(SpectralPatchParams {
                sample_rate: self.sample_rate,
                n_fft: self.n_fft,
                hop_length: self.hop_length,
                patch_size: self.patch_size,
                min_patch_energy: self.min_patch_energy,
                hash_algorithm,
            }),
            Algorithm::Chroma => ExtractorConfig::Chroma(ChromaParams {
                sample_rate: self.sample_rate,
                n_fft: self.n_fft,
                hop_length: self.hop_length,
                threshold: self.threshold,
                hash_algorithm,
            }),
        })
    }
}

enum RunError {
    /// Bad arguments or inputs; exit 1
    User(String),
    /// Engine or store failure; exit 2
    Internal(anyhow::Error),
}

fn user(e: impl ToString) -> RunError {
    RunError::User(e.to_string())
}

fn engine_error(e: waveprint_core::Error) -> RunError {
    match e {
        waveprint_core::Error::InvalidInput(msg) => RunError::User(msg),
        other => RunError::Internal(anyhow::Error::new(other)),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::User(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(1)
        }
        Err(RunError::Internal(e)) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    tracing::info!("waveprint {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Database: {}", cli.db.display());

    let index = SqliteIndex::open(&cli.db)
        .await
        .map_err(|e| RunError::Internal(anyhow::Error::new(e)))?;
    let engine = Engine::with_config(
        Arc::new(index),
        Arc::new(SymphoniaLoader::new()),
        EngineConfig {
            max_workers: cli.max_workers,
            top_k: 5,
        },
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Command::Register { params, paths } => {
            let config = params.to_config().map_err(user)?;
            let summary = engine
                .register_all(&paths, &config, &cancel)
                .await
                .map_err(engine_error)?;

            println!(
                "Registered {} file(s) ({} already registered, {} skipped, {} failed).",
                summary.registered,
                summary.already_registered,
                summary.skipped,
                summary.failures.len()
            );
            for failure in &summary.failures {
                println!("  failed: {}: {}", failure.path.display(), failure.error);
            }
        }

        Command::Identify {
            params,
            start,
            end,
            file,
        } => {
            let config = params.to_config().map_err(user)?;
            let window = match (start, end) {
                (Some(start), Some(end)) => Some(TimeWindow {
                    start_s: parse_mmss(&start).map_err(user)?,
                    end_s: parse_mmss(&end).map_err(user)?,
                }),
                (None, None) => None,
                _ => {
                    return Err(RunError::User(
                        "--start and --end must be given together".to_string(),
                    ))
                }
            };

            let outcome = engine
                .identify(&file, &config, window, &cancel)
                .await
                .map_err(engine_error)?;

            match outcome {
                MatchOutcome::Match(report) => {
                    let frame_seconds =
                        config.hop_length() as f64 / f64::from(config.sample_rate());
                    println!(
                        "Best match: '{}' (ID: {}). Score: {}. Offset: {} frames (~{:.2}s).",
                        report.reference.filename,
                        report.best.reference_id,
                        report.best.score,
                        report.best.offset_frames,
                        report.best.offset_frames as f64 * frame_seconds
                    );
                    for (rank, runner) in report.runners_up.iter().enumerate() {
                        println!(
                            "  {}. reference {} (score {}, offset {} frames)",
                            rank + 2,
                            runner.reference_id,
                            runner.score,
                            runner.offset_frames
                        );
                    }
                }
                MatchOutcome::NoMatch { reason } => {
                    println!("No match: {reason}");
                }
            }
        }

        Command::Clear => {
            engine
                .clear()
                .await
                .map_err(|e| RunError::Internal(anyhow::Error::new(e)))?;
            println!("Database cleared.");
        }
    }

    Ok(())
}

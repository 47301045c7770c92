//! Engine facade: orchestrates the register and identify flows.
//!
//! The engine owns nothing but its two collaborator seams, an
//! [`AudioLoader`] and a [`FingerprintIndex`], plus a worker limit.
//! Decoding and extraction are CPU-bound and run on the blocking pool; index
//! writes go through the backend's own serialisation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{self, AudioLoader};
use crate::error::{Error, Result};
use crate::fingerprint::{self, Fingerprint};
use crate::index::{filename_of, FingerprintIndex, ReferenceId, ReferenceMetadata};
use crate::matcher::{self, MatchOutcome};
use crate::params::ExtractorConfig;

/// Engine-level tunables.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Upper bound on concurrent extractions; 0 means one per core
    pub max_workers: usize,
    /// Runners-up reported alongside the best match
    pub top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            top_k: 5,
        }
    }
}

/// Optional `[start, end]` query window, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start_s: f64,
    pub end_s: f64,
}

/// Result of registering one file.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    Registered {
        reference_id: ReferenceId,
        fingerprints: usize,
    },
    /// The (path, algorithm) pair already had fingerprints; nothing written.
    AlreadyRegistered { reference_id: ReferenceId },
    /// Benign extraction outcome (empty signal, no peaks, no fingerprints).
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct RegisterFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Aggregate result of a bulk registration.
#[derive(Debug, Clone, Default)]
pub struct RegisterSummary {
    pub registered: usize,
    pub already_registered: usize,
    pub skipped: usize,
    pub failures: Vec<RegisterFailure>,
}

/// The fingerprinting engine facade.
#[derive(Clone)]
pub struct Engine {
    index: Arc<dyn FingerprintIndex>,
    loader: Arc<dyn AudioLoader>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(index: Arc<dyn FingerprintIndex>, loader: Arc<dyn AudioLoader>) -> Self {
        Self::with_config(index, loader, EngineConfig::default())
    }

    pub fn with_config(
        index: Arc<dyn FingerprintIndex>,
        loader: Arc<dyn AudioLoader>,
        config: EngineConfig,
    ) -> Self {
        Self {
            index,
            loader,
            config,
        }
    }

    pub fn index(&self) -> &Arc<dyn FingerprintIndex> {
        &self.index
    }

    fn worker_limit(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        if self.config.max_workers == 0 {
            cores
        } else {
            cores.min(self.config.max_workers)
        }
    }

    /// Register a single reference file under the configured algorithm.
    ///
    /// Re-registering an already-fingerprinted (path, algorithm) pair
    /// short-circuits and returns the existing id without touching the store.
    pub async fn register_file(
        &self,
        path: &Path,
        config: &ExtractorConfig,
        cancel: &CancellationToken,
    ) -> Result<RegisterOutcome> {
        config.validate()?;
        let algorithm = config.algorithm();
        let path_str = path.to_string_lossy().into_owned();

        let mut metadata = ReferenceMetadata::new();
        metadata.insert("filename".to_string(), filename_of(path));

        if self.index.is_registered(&path_str, algorithm).await? {
            let reference_id = self.index.ensure_reference(&path_str, &metadata).await?;
            debug!(
                path = %path.display(),
                %algorithm,
                reference_id,
                "already registered, skipping extraction"
            );
            return Ok(RegisterOutcome::AlreadyRegistered { reference_id });
        }

        self.check_params(config, true).await?;

        let started = Instant::now();
        let fingerprints = match self.extract_from_file(path, config, None, cancel).await {
            Ok(fps) => fps,
            Err(e) if e.is_benign() => {
                warn!(path = %path.display(), reason = %e, "skipping file");
                return Ok(RegisterOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let reference_id = self.index.ensure_reference(&path_str, &metadata).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.index
            .write_batch(reference_id, algorithm, &fingerprints)
            .await?;

        info!(
            path = %path.display(),
            %algorithm,
            reference_id,
            fingerprints = fingerprints.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "registered reference"
        );
        Ok(RegisterOutcome::Registered {
            reference_id,
            fingerprints: fingerprints.len(),
        })
    }

    /// Register many files through a bounded worker pool.
    ///
    /// A failure on one file is recorded and the rest keep going;
    /// cancellation stops the pool and surfaces as `Cancelled`.
    pub async fn register_all(
        &self,
        paths: &[PathBuf],
        config: &ExtractorConfig,
        cancel: &CancellationToken,
    ) -> Result<RegisterSummary> {
        config.validate()?;
        let workers = self.worker_limit();
        info!(
            files = paths.len(),
            workers,
            algorithm = %config.algorithm(),
            "starting bulk registration"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for path in paths {
            if cancel.is_cancelled() {
                break;
            }
            let engine = self.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let path = path.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (path, Err(Error::Internal("worker pool closed".into()))),
                };
                let outcome = engine.register_file(&path, &config, &cancel).await;
                (path, outcome)
            });
        }

        let mut summary = RegisterSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let (path, outcome) = joined
                .map_err(|e| Error::Internal(format!("registration task panicked: {e}")))?;
            match outcome {
                Ok(RegisterOutcome::Registered { .. }) => summary.registered += 1,
                Ok(RegisterOutcome::AlreadyRegistered { .. }) => summary.already_registered += 1,
                Ok(RegisterOutcome::Skipped { reason }) => {
                    debug!(path = %path.display(), reason = %reason, "file skipped");
                    summary.skipped += 1;
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "registration failed, continuing");
                    summary.failures.push(RegisterFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!(
            registered = summary.registered,
            already_registered = summary.already_registered,
            skipped = summary.skipped,
            failed = summary.failures.len(),
            "bulk registration finished"
        );
        Ok(summary)
    }

    /// Identify the reference a query clip was drawn from.
    ///
    /// `window` restricts the query to a `[start, end]` range in seconds.
    pub async fn identify(
        &self,
        path: &Path,
        config: &ExtractorConfig,
        window: Option<TimeWindow>,
        cancel: &CancellationToken,
    ) -> Result<MatchOutcome> {
        config.validate()?;
        self.check_params(config, false).await?;

        let started = Instant::now();
        let fingerprints = match self.extract_from_file(path, config, window, cancel).await {
            Ok(fps) => fps,
            Err(e) if e.is_benign() => {
                return Ok(MatchOutcome::NoMatch {
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        debug!(
            path = %path.display(),
            fingerprints = fingerprints.len(),
            "extracted query fingerprints"
        );

        let outcome = matcher::find_best_match(
            self.index.as_ref(),
            config.algorithm(),
            &fingerprints,
            self.config.top_k,
            cancel,
        )
        .await?;

        match &outcome {
            MatchOutcome::Match(report) => info!(
                path = %path.display(),
                reference_id = report.best.reference_id,
                filename = %report.reference.filename,
                score = report.best.score,
                offset_frames = report.best.offset_frames,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "identified query"
            ),
            MatchOutcome::NoMatch { reason } => info!(
                path = %path.display(),
                reason = %reason,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "no match"
            ),
        }
        Ok(outcome)
    }

    /// Drop everything from the index.
    pub async fn clear(&self) -> Result<()> {
        self.index.clear_all().await
    }

    /// Warn when the (algorithm, params) tuple drifts from the one recorded
    /// at first registration; matching proceeds but will find nothing.
    async fn check_params(&self, config: &ExtractorConfig, register: bool) -> Result<()> {
        let algorithm = config.algorithm();
        let json = config.canonical_json()?;
        match self.index.load_params(algorithm).await? {
            None => {
                if register {
                    self.index.store_params(algorithm, &json).await?;
                }
            }
            Some(stored) if stored != json => {
                warn!(
                    %algorithm,
                    "parameters differ from those used at registration; matches are unlikely"
                );
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Decode, slice and extract on the blocking pool.
    async fn extract_from_file(
        &self,
        path: &Path,
        config: &ExtractorConfig,
        window: Option<TimeWindow>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fingerprint>> {
        let loader = Arc::clone(&self.loader);
        let config = config.clone();
        let path = path.to_path_buf();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            let sample_rate = config.sample_rate();
            let samples = loader.load(&path, sample_rate)?;
            let samples = match window {
                Some(w) => {
                    audio::slice_seconds(&samples, sample_rate, w.start_s, w.end_s).to_vec()
                }
                None => samples,
            };
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let extractor = fingerprint::build_extractor(&config);
            extractor.extract(&samples, &cancel)
        })
        .await
        .map_err(|e| Error::Internal(format!("extraction task panicked: {e}")))?
    }
}

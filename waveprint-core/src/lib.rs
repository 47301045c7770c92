//! waveprint-core - Acoustic fingerprinting and identification engine
//!
//! Registers reference audio as compact content-derived hash fingerprints
//! and identifies short, possibly noisy or time-offset query clips by
//! histogram-of-offsets voting over the stored fingerprints.
//!
//! Pipeline: decode/resample ([`audio`]) → STFT magnitude or chroma spectra
//! ([`dsp`]) → one of three extractors ([`fingerprint`]) → algorithm-keyed
//! hash index ([`index`]) → offset-histogram matching ([`matcher`]), all
//! orchestrated by the [`engine::Engine`] facade.

pub mod audio;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod matcher;
pub mod params;
pub mod timecode;

pub use engine::{Engine, EngineConfig, RegisterOutcome, RegisterSummary, TimeWindow};
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, FingerprintExtractor};
pub use index::{FingerprintIndex, MemoryIndex, ReferenceId, ReferenceInfo, SqliteIndex};
pub use matcher::{MatchOutcome, MatchReport, RankedMatch};
pub use params::{
    Algorithm, ChromaParams, ExtractorConfig, HashAlgorithm, MaximaPairingParams,
    SpectralPatchParams,
};

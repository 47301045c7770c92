//! Algorithm identifiers and extraction parameters.
//!
//! Every extractor variant is fully described by a parameter struct; the
//! `ExtractorConfig` enum carries the (algorithm, parameters) tuple end to end
//! so registration and identification can be checked for coherence. The
//! canonical JSON rendering of a config is what the index stores per
//! algorithm.
//!
//! Magnitude thresholds (`min_amplitude`, `min_patch_energy`) are linear
//! spectrogram magnitudes, not decibels.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Fingerprinting algorithm identifier.
///
/// The string form partitions the index: fingerprints registered under one
/// algorithm are never visible to lookups under another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    MaximaPairing,
    SpectralPatch,
    Chroma,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::MaximaPairing => "maxima-pairing",
            Algorithm::SpectralPatch => "spectral-patch",
            Algorithm::Chroma => "chroma",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "maxima-pairing" => Ok(Algorithm::MaximaPairing),
            "spectral-patch" => Ok(Algorithm::SpectralPatch),
            "chroma" => Ok(Algorithm::Chroma),
            other => Err(Error::InvalidInput(format!(
                "unknown algorithm '{other}' (expected maxima-pairing, spectral-patch or chroma)"
            ))),
        }
    }
}

/// Digest used to derive fingerprint hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Lowercase hex digest of `data`.
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha1 => format!("{:x}", Sha1::digest(data)),
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha1 => f.write_str("sha1"),
            HashAlgorithm::Sha256 => f.write_str("sha256"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(Error::InvalidInput(format!(
                "unknown hash algorithm '{other}' (expected sha1 or sha256)"
            ))),
        }
    }
}

/// Parameters for the maxima-pairing (combinatorial peak hashing) extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaximaPairingParams {
    /// Target sample rate (Hz); audio is resampled to this
    pub sample_rate: u32,
    /// STFT window length (samples)
    pub n_fft: usize,
    /// STFT hop (samples); defines the frame unit of LocalTime
    pub hop_length: usize,
    /// Side length of the peak-picking square
    pub neighborhood_size: usize,
    /// Linear magnitude threshold for peaks
    pub min_amplitude: f32,
    /// Minimum anchor-target frame delta (inclusive)
    pub target_t_min: u32,
    /// Maximum anchor-target frame delta (inclusive)
    pub target_t_max: u32,
    /// Maximum |delta f| between anchor and target bins
    pub target_f_max_delta: u32,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for MaximaPairingParams {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 2048,
            hop_length: 512,
            neighborhood_size: 20,
            min_amplitude: 10.0,
            target_t_min: 5,
            target_t_max: 100,
            target_f_max_delta: 100,
            hash_algorithm: HashAlgorithm::Sha1,
        }
    }
}

/// Parameters for the spectral-patch extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralPatchParams {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Square tile side, in (frequency bins, frames)
    pub patch_size: usize,
    /// Minimum arithmetic-mean magnitude for a tile to be emitted
    pub min_patch_energy: f32,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for SpectralPatchParams {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 2048,
            hop_length: 512,
            patch_size: 16,
            min_patch_energy: 1.0,
            hash_algorithm: HashAlgorithm::Sha1,
        }
    }
}

/// Parameters for the chroma-dominant-bin extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChromaParams {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Minimum column-max chroma value for a frame to be emitted
    pub threshold: f32,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for ChromaParams {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 2048,
            hop_length: 512,
            threshold: 0.5,
            hash_algorithm: HashAlgorithm::Sha1,
        }
    }
}

/// The (algorithm, parameters) tuple carried end to end through registration
/// and identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "kebab-case")]
pub enum ExtractorConfig {
    MaximaPairing(MaximaPairingParams),
    SpectralPatch(SpectralPatchParams),
    Chroma(ChromaParams),
}

impl ExtractorConfig {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            ExtractorConfig::MaximaPairing(_) => Algorithm::MaximaPairing,
            ExtractorConfig::SpectralPatch(_) => Algorithm::SpectralPatch,
            ExtractorConfig::Chroma(_) => Algorithm::Chroma,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            ExtractorConfig::MaximaPairing(p) => p.sample_rate,
            ExtractorConfig::SpectralPatch(p) => p.sample_rate,
            ExtractorConfig::Chroma(p) => p.sample_rate,
        }
    }

    pub fn hop_length(&self) -> usize {
        match self {
            ExtractorConfig::MaximaPairing(p) => p.hop_length,
            ExtractorConfig::SpectralPatch(p) => p.hop_length,
            ExtractorConfig::Chroma(p) => p.hop_length,
        }
    }

    /// Canonical JSON rendering, stored in the index and compared at
    /// identification time to warn about parameter drift.
    pub fn canonical_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Internal(format!("failed to serialize parameters: {e}")))
    }

    pub fn from_canonical_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Internal(format!("failed to parse stored parameters: {e}")))
    }

    /// Rejects parameter tuples no extractor can run with.
    pub fn validate(&self) -> Result<()> {
        let (n_fft, hop) = match self {
            ExtractorConfig::MaximaPairing(p) => {
                if p.target_t_min > p.target_t_max {
                    return Err(Error::InvalidInput(format!(
                        "target_t_min ({}) exceeds target_t_max ({})",
                        p.target_t_min, p.target_t_max
                    )));
                }
                if p.neighborhood_size == 0 {
                    return Err(Error::InvalidInput(
                        "neighborhood_size must be at least 1".into(),
                    ));
                }
                (p.n_fft, p.hop_length)
            }
            ExtractorConfig::SpectralPatch(p) => {
                if p.patch_size == 0 {
                    return Err(Error::InvalidInput("patch_size must be at least 1".into()));
                }
                (p.n_fft, p.hop_length)
            }
            ExtractorConfig::Chroma(p) => (p.n_fft, p.hop_length),
        };
        if n_fft < 2 {
            return Err(Error::InvalidInput(format!("n_fft ({n_fft}) is too small")));
        }
        if hop == 0 {
            return Err(Error::InvalidInput("hop_length must be non-zero".into()));
        }
        if self.sample_rate() == 0 {
            return Err(Error::InvalidInput("sample_rate must be non-zero".into()));
        }
        Ok(())
    }
}

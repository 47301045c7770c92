//! Fingerprint extraction.
//!
//! Three interchangeable extractors turn a mono signal into `(hash,
//! local_time)` tuples: maxima-pairing (combinatorial peak hashing),
//! spectral-patch (tile digests) and chroma-dominant-bin. All three are
//! stateless with respect to the signal and safe to call concurrently; the
//! registration and query paths run the exact same code, which is what makes
//! hashes collide at matching time.

pub mod chroma;
pub mod maxima;
pub mod patch;

pub use chroma::ChromaExtractor;
pub use maxima::MaximaPairingExtractor;
pub use patch::SpectralPatchExtractor;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::params::{Algorithm, ExtractorConfig};

/// A content-derived descriptor: a hex digest plus the spectrogram frame it
/// was observed at, relative to the start of the fed segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Lowercase hex rendering of the configured digest
    pub hash: String,
    /// Frame index (`hop_length / sample_rate` seconds per frame)
    pub local_time: u32,
}

/// One extractor variant, fully parameterised at construction.
pub trait FingerprintExtractor: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Extract all fingerprints of a mono signal sampled at the configured
    /// rate.
    ///
    /// Returns `NoPeaks`/`NoFingerprints` when the signal produces nothing;
    /// both are benign and handled by the facade. Cancellation is polled
    /// inside the transform and scan loops.
    fn extract(&self, samples: &[f32], cancel: &CancellationToken) -> Result<Vec<Fingerprint>>;
}

/// Build the extractor described by `config`.
pub fn build_extractor(config: &ExtractorConfig) -> Box<dyn FingerprintExtractor> {
    match config {
        ExtractorConfig::MaximaPairing(p) => Box::new(MaximaPairingExtractor::new(p.clone())),
        ExtractorConfig::SpectralPatch(p) => Box::new(SpectralPatchExtractor::new(p.clone())),
        ExtractorConfig::Chroma(p) => Box::new(ChromaExtractor::new(p.clone())),
    }
}

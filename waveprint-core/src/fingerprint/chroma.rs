//! Chroma-dominant-bin extractor.

use tokio_util::sync::CancellationToken;

use crate::dsp::{chroma_spectrogram, magnitude_spectrogram, Spectrogram};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FingerprintExtractor};
use crate::params::{Algorithm, ChromaParams};

/// Emits one fingerprint per frame whose strongest pitch class clears the
/// threshold, hashing `"{bin}:{frame}"`. Coarser than peak pairing but
/// resilient to timbre changes that move spectral peaks around.
pub struct ChromaExtractor {
    params: ChromaParams,
}

impl ChromaExtractor {
    pub fn new(params: ChromaParams) -> Self {
        Self { params }
    }

    fn column_fingerprints(
        &self,
        chroma: &Spectrogram,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fingerprint>> {
        let p = &self.params;
        let mut fingerprints = Vec::new();

        for t in 0..chroma.frames() {
            if t % 1024 == 0 && cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut best_bin = 0usize;
            let mut best = chroma.get(0, t);
            for c in 1..chroma.bins() {
                let value = chroma.get(c, t);
                // Strictly greater keeps the smallest bin on ties.
                if value > best {
                    best = value;
                    best_bin = c;
                }
            }

            if best >= p.threshold {
                let input = format!("{best_bin}:{t}");
                fingerprints.push(Fingerprint {
                    hash: p.hash_algorithm.hex_digest(input.as_bytes()),
                    local_time: t as u32,
                });
            }
        }

        Ok(fingerprints)
    }
}

impl FingerprintExtractor for ChromaExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Chroma
    }

    fn extract(&self, samples: &[f32], cancel: &CancellationToken) -> Result<Vec<Fingerprint>> {
        let p = &self.params;
        let spectrogram = magnitude_spectrogram(samples, p.n_fft, p.hop_length, cancel)?;
        let chroma = chroma_spectrogram(&spectrogram, p.sample_rate, p.n_fft);

        let fingerprints = self.column_fingerprints(&chroma, cancel)?;
        if fingerprints.is_empty() {
            return Err(Error::NoFingerprints);
        }
        Ok(fingerprints)
    }
}

//! Spectral-patch extractor: digests of fixed-size spectrogram tiles.

use tokio_util::sync::CancellationToken;

use crate::dsp::{magnitude_spectrogram, Spectrogram};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FingerprintExtractor};
use crate::params::{Algorithm, SpectralPatchParams};

/// Tiles the spectrogram into non-overlapping `P x P` patches and hashes the
/// raw values of every tile whose mean magnitude clears the energy floor.
///
/// Patch bytes are the row-major (frequency rows, time columns) f32 values in
/// little-endian order. Pinning width and endianness keeps the digests
/// byte-identical across platforms.
pub struct SpectralPatchExtractor {
    params: SpectralPatchParams,
}

impl SpectralPatchExtractor {
    pub fn new(params: SpectralPatchParams) -> Self {
        Self { params }
    }

    fn tile_fingerprints(
        &self,
        spec: &Spectrogram,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fingerprint>> {
        let p = &self.params;
        let size = p.patch_size;
        let mut fingerprints = Vec::new();
        let mut bytes = Vec::with_capacity(size * size * 4);

        let mut f0 = 0;
        while f0 + size <= spec.bins() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let mut t0 = 0;
            while t0 + size <= spec.frames() {
                let mut sum = 0.0f32;
                for f in f0..f0 + size {
                    for t in t0..t0 + size {
                        sum += spec.get(f, t);
                    }
                }
                let mean = sum / (size * size) as f32;

                if mean >= p.min_patch_energy {
                    bytes.clear();
                    for f in f0..f0 + size {
                        for t in t0..t0 + size {
                            bytes.extend_from_slice(&spec.get(f, t).to_le_bytes());
                        }
                    }
                    fingerprints.push(Fingerprint {
                        hash: p.hash_algorithm.hex_digest(&bytes),
                        local_time: t0 as u32,
                    });
                }
                t0 += size;
            }
            f0 += size;
        }

        Ok(fingerprints)
    }
}

impl FingerprintExtractor for SpectralPatchExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SpectralPatch
    }

    fn extract(&self, samples: &[f32], cancel: &CancellationToken) -> Result<Vec<Fingerprint>> {
        let p = &self.params;
        let spectrogram = magnitude_spectrogram(samples, p.n_fft, p.hop_length, cancel)?;
        let fingerprints = self.tile_fingerprints(&spectrogram, cancel)?;
        if fingerprints.is_empty() {
            return Err(Error::NoFingerprints);
        }
        Ok(fingerprints)
    }
}

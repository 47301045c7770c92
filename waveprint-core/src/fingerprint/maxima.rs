//! Maxima-pairing extractor: combinatorial hashing of spectrogram peak pairs.

use tokio_util::sync::CancellationToken;

use crate::dsp::{find_peaks, magnitude_spectrogram, Peak};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FingerprintExtractor};
use crate::params::{Algorithm, MaximaPairingParams};

/// Pairs each peak (the anchor) with the peaks inside a bounded
/// time/frequency target zone after it. A pair is far more discriminative
/// than a single peak, and the digest input `"{fa}:{ft}:{dt}"` is invariant
/// under time translation.
pub struct MaximaPairingExtractor {
    params: MaximaPairingParams,
}

impl MaximaPairingExtractor {
    pub fn new(params: MaximaPairingParams) -> Self {
        Self { params }
    }

    /// Pair time-sorted peaks. The scan over targets stops as soon as the
    /// frame delta exceeds `target_t_max`; that early break is only valid
    /// because `peaks` is sorted by `(frame, bin)`.
    fn pair_peaks(&self, peaks: &[Peak], cancel: &CancellationToken) -> Result<Vec<Fingerprint>> {
        let p = &self.params;
        let mut fingerprints = Vec::new();

        for (i, anchor) in peaks.iter().enumerate() {
            if i % 256 == 0 && cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            for target in &peaks[i + 1..] {
                let dt = (target.frame - anchor.frame) as u32;
                if dt > p.target_t_max {
                    break;
                }
                if dt < p.target_t_min {
                    continue;
                }
                if anchor.bin.abs_diff(target.bin) as u32 > p.target_f_max_delta {
                    continue;
                }

                // ASCII decimal, no padding: "5:7:12" and "05:07:12" must
                // never collide.
                let input = format!("{}:{}:{}", anchor.bin, target.bin, dt);
                fingerprints.push(Fingerprint {
                    hash: p.hash_algorithm.hex_digest(input.as_bytes()),
                    local_time: anchor.frame as u32,
                });
            }
        }

        Ok(fingerprints)
    }
}

impl FingerprintExtractor for MaximaPairingExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::MaximaPairing
    }

    fn extract(&self, samples: &[f32], cancel: &CancellationToken) -> Result<Vec<Fingerprint>> {
        let p = &self.params;
        let spectrogram = magnitude_spectrogram(samples, p.n_fft, p.hop_length, cancel)?;
        let peaks = find_peaks(&spectrogram, p.neighborhood_size, p.min_amplitude);
        if peaks.is_empty() {
            return Err(Error::NoPeaks);
        }

        let fingerprints = self.pair_peaks(&peaks, cancel)?;
        if fingerprints.is_empty() {
            return Err(Error::NoFingerprints);
        }
        Ok(fingerprints)
    }
}

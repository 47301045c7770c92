//! 2-D local-maximum peak picking on the magnitude spectrogram.

use crate::dsp::stft::Spectrogram;

/// A spectrogram cell that is a neighbourhood maximum above the amplitude
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    /// Time frame index
    pub frame: usize,
    /// Frequency bin index
    pub bin: usize,
}

/// Find all peaks of `spec`.
///
/// A cell `(f, t)` is a peak iff its value is at least `min_amplitude` and
/// equals the maximum of the square neighbourhood of side `neighborhood_size`
/// around it (zero-padded at the edges). Equal maxima within a neighbourhood
/// are all kept.
///
/// The result is sorted by `(frame, bin)` ascending; the maxima-pairing
/// extractor's early termination depends on this ordering.
pub fn find_peaks(spec: &Spectrogram, neighborhood_size: usize, min_amplitude: f32) -> Vec<Peak> {
    let radius = neighborhood_size / 2;
    let bins = spec.bins();
    let frames = spec.frames();
    let mut peaks = Vec::new();

    for t in 0..frames {
        'cells: for f in 0..bins {
            let value = spec.get(f, t);
            if value < min_amplitude {
                continue;
            }

            // Out-of-range neighbours are zero and magnitudes are
            // non-negative, so only in-range cells can exceed `value`.
            let f_lo = f.saturating_sub(radius);
            let f_hi = (f + radius).min(bins - 1);
            let t_lo = t.saturating_sub(radius);
            let t_hi = (t + radius).min(frames - 1);
            for nf in f_lo..=f_hi {
                for nt in t_lo..=t_hi {
                    if spec.get(nf, nt) > value {
                        continue 'cells;
                    }
                }
            }

            peaks.push(Peak { frame: t, bin: f });
        }
    }

    peaks
}

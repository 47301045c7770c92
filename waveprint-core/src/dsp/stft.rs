//! STFT magnitude spectrogram.
//!
//! Frames are centered: the signal is zero-padded by `n_fft / 2` samples on
//! both edges, so frame `t` is the windowed transform of the samples around
//! `t * hop_length`. The frame count is `1 + len / hop_length` and the bin
//! count `1 + n_fft / 2`, matching the canonical reference layout the rest of
//! the pipeline assumes.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Dense non-negative 2-D spectrum, stored row-major by frequency bin.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    data: Vec<f32>,
    bins: usize,
    frames: usize,
}

impl Spectrogram {
    pub(crate) fn zeroed(bins: usize, frames: usize) -> Self {
        Self {
            data: vec![0.0; bins * frames],
            bins,
            frames,
        }
    }

    /// Build from per-bin rows; every row must have the same length.
    /// Mostly useful for constructing fixtures.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Self {
        let bins = rows.len();
        let frames = rows.first().map_or(0, Vec::len);
        assert!(
            rows.iter().all(|r| r.len() == frames),
            "ragged spectrogram rows"
        );
        Self {
            data: rows.into_iter().flatten().collect(),
            bins,
            frames,
        }
    }

    /// Number of frequency bins (rows).
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Number of time frames (columns).
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn get(&self, bin: usize, frame: usize) -> f32 {
        self.data[bin * self.frames + frame]
    }

    #[inline]
    pub(crate) fn set(&mut self, bin: usize, frame: usize, value: f32) {
        self.data[bin * self.frames + frame] = value;
    }

    /// All values of one frequency bin across time.
    pub fn row(&self, bin: usize) -> &[f32] {
        &self.data[bin * self.frames..(bin + 1) * self.frames]
    }
}

/// Periodic Hann window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Magnitude spectrogram `|STFT(x)|` with shape `(1 + n_fft/2, 1 + len/hop)`.
///
/// Cancellation is polled between frames so long transforms abort promptly.
pub fn magnitude_spectrogram(
    samples: &[f32],
    n_fft: usize,
    hop_length: usize,
    cancel: &CancellationToken,
) -> Result<Spectrogram> {
    let frames = samples.len() / hop_length + 1;
    let bins = n_fft / 2 + 1;
    let pad = n_fft / 2;

    // Zero-pad so the first frame is centered on sample 0 and the last frame
    // has a full window to read.
    let padded_len = ((frames - 1) * hop_length + n_fft).max(pad + samples.len());
    let mut padded = vec![0.0f32; padded_len];
    padded[pad..pad + samples.len()].copy_from_slice(samples);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let window = hann_window(n_fft);
    let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n_fft];

    let mut spectrogram = Spectrogram::zeroed(bins, frames);
    for t in 0..frames {
        if t % 64 == 0 && cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let start = t * hop_length;
        for (j, w) in window.iter().enumerate() {
            buffer[j] = Complex::new(padded[start + j] * w, 0.0);
        }
        fft.process(&mut buffer);
        for (k, value) in buffer.iter().take(bins).enumerate() {
            spectrogram.set(k, t, value.norm());
        }
    }

    Ok(spectrogram)
}

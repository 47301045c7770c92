//! Audio decoding and preprocessing.

pub mod loader;

pub use loader::{AudioLoader, SymphoniaLoader};

use tracing::warn;

/// Cut `samples` to the `[start_s, end_s]` range, in seconds.
///
/// Returns `x[floor(start * sr) .. min(len, floor(end * sr))]`. An empty or
/// inverted range falls back to the full signal with a warning, matching the
/// forgiving behaviour callers expect from a query window.
pub fn slice_seconds(samples: &[f32], sample_rate: u32, start_s: f64, end_s: f64) -> &[f32] {
    let start = ((start_s * f64::from(sample_rate)).floor().max(0.0)) as usize;
    let end = ((end_s * f64::from(sample_rate)).floor() as usize).min(samples.len());

    if start >= end {
        warn!(
            start_s,
            end_s,
            samples = samples.len(),
            "invalid time range, using the full signal"
        );
        return samples;
    }

    &samples[start..end]
}

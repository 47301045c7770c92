//! 12-bin pitch-class (chroma) spectrogram.
//!
//! Each linear-frequency magnitude bin is folded onto its nearest
//! equal-temperament pitch class (A440 reference, row 0 = C), then every
//! column is scaled so its maximum value is 1. All-zero columns stay zero.

use crate::dsp::stft::Spectrogram;

const PITCH_CLASSES: usize = 12;

/// Pitch class of a frequency in Hz, or `None` below the audible fold range.
fn pitch_class(freq: f32) -> Option<usize> {
    if freq < 16.0 {
        // Below C0; folding DC and sub-audio bins only adds noise.
        return None;
    }
    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    Some((midi.round() as i64).rem_euclid(PITCH_CLASSES as i64) as usize)
}

/// Fold a magnitude spectrogram onto pitch classes.
///
/// `sample_rate` and `n_fft` must be the values the spectrogram was computed
/// with; they define the center frequency `k * sample_rate / n_fft` of bin
/// `k`.
pub fn chroma_spectrogram(spec: &Spectrogram, sample_rate: u32, n_fft: usize) -> Spectrogram {
    let frames = spec.frames();
    let mut chroma = Spectrogram::zeroed(PITCH_CLASSES, frames);

    // Bin -> pitch-class map is independent of time; compute once.
    let classes: Vec<Option<usize>> = (0..spec.bins())
        .map(|k| pitch_class(k as f32 * sample_rate as f32 / n_fft as f32))
        .collect();

    for (bin, class) in classes.iter().enumerate() {
        let Some(class) = class else { continue };
        let row = spec.row(bin);
        for (t, &value) in row.iter().enumerate() {
            let folded = chroma.get(*class, t) + value;
            chroma.set(*class, t, folded);
        }
    }

    // Per-column max normalisation into [0, 1].
    for t in 0..frames {
        let max = (0..PITCH_CLASSES)
            .map(|c| chroma.get(c, t))
            .fold(0.0f32, f32::max);
        if max > 0.0 {
            for c in 0..PITCH_CLASSES {
                let scaled = chroma.get(c, t) / max;
                chroma.set(c, t, scaled);
            }
        }
    }

    chroma
}

//! Signal-processing primitives shared by the fingerprint extractors.
//!
//! Everything here is a pure function of its inputs; extractors compose these
//! with the hashing rules in [`crate::fingerprint`].

pub mod chroma;
pub mod peaks;
pub mod stft;

pub use chroma::chroma_spectrogram;
pub use peaks::{find_peaks, Peak};
pub use stft::{magnitude_spectrogram, Spectrogram};

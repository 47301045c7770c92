//! Audio file loading: decode, mono downmix, resample.

use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{Error, Result};

/// Produces a mono floating-point signal at a caller-chosen rate.
///
/// The engine depends only on this seam; swapping the decoder backend does
/// not affect fingerprinting semantics.
pub trait AudioLoader: Send + Sync {
    /// Decode `path` into mono f32 samples at `target_sample_rate` Hz.
    fn load(&self, path: &Path, target_sample_rate: u32) -> Result<Vec<f32>>;
}

/// Symphonia-backed loader handling every container/codec the `all` feature
/// set enables (wav, mp3, flac, ogg, m4a among them).
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaLoader;

impl SymphoniaLoader {
    pub fn new() -> Self {
        Self
    }
}

impl AudioLoader for SymphoniaLoader {
    fn load(&self, path: &Path, target_sample_rate: u32) -> Result<Vec<f32>> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("failed to probe {}: {e}", path.display())))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode(format!("no audio track in {}", path.display())))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let native_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("sample rate not specified in codec params".into()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("failed to create decoder: {e}")))?;

        let mut mono: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(Error::Decode(format!("failed to read packet: {e}"))),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Recoverable per the symphonia contract; drop the packet.
                    debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("failed to decode packet: {e}"))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let buf = sample_buf
                .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            buf.copy_interleaved_ref(decoded);

            let samples = buf.samples();
            if channels <= 1 {
                mono.extend_from_slice(samples);
            } else {
                // Arithmetic-mean downmix across all channels.
                for frame in samples.chunks_exact(channels) {
                    mono.push(frame.iter().sum::<f32>() / channels as f32);
                }
            }
        }

        if mono.is_empty() {
            return Err(Error::EmptySignal);
        }

        let signal = if native_rate != target_sample_rate {
            debug!(
                native_rate,
                target_sample_rate,
                "resampling {}",
                path.display()
            );
            resample_mono(mono, native_rate, target_sample_rate)?
        } else {
            mono
        };

        if signal.is_empty() {
            return Err(Error::EmptySignal);
        }
        Ok(signal)
    }
}

/// Sinc resampling of a mono signal, single pass over the whole buffer.
fn resample_mono(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(target_rate) / f64::from(source_rate);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| Error::Internal(format!("failed to create resampler: {e}")))?;

    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| Error::Internal(format!("resampling failed: {e}")))?;

    Ok(output.pop().unwrap_or_default())
}

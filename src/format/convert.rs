//! Format conversion between two fixed PCM formats
//!
//! A [`FormatConverter`] is constructed once per pipeline direction
//! (network → playback device, microphone → network) and converts every
//! buffer the same way: sample-width normalization, channel mixing, then
//! linear-interpolation resampling. Conversion is deterministic and free
//! of side effects.

use crate::error::FormatError;
use crate::format::{PcmBuffer, PcmFormat, SampleKind, Samples};

/// Converts f32 samples to i16.
///
/// Uses ×32767 for symmetric scaling, clamping out-of-range input.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts i16 samples to f32 in [-1.0, 1.0).
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Stateless converter between two fixed formats.
pub struct FormatConverter {
    source: PcmFormat,
    target: PcmFormat,
}

impl FormatConverter {
    /// Create a converter for the given format pair.
    ///
    /// Only mono and stereo streams are supported, and both rates must be
    /// non-zero; anything else cannot occur in the two fixed pipelines but
    /// is rejected here rather than trusted.
    pub fn new(source: PcmFormat, target: PcmFormat) -> Result<Self, FormatError> {
        for fmt in [&source, &target] {
            if fmt.channels == 0 || fmt.channels > 2 {
                return Err(FormatError::UnsupportedChannels(fmt.channels));
            }
            if fmt.sample_rate == 0 {
                return Err(FormatError::InvalidSampleRate(fmt.sample_rate));
            }
        }
        Ok(Self { source, target })
    }

    pub fn source(&self) -> PcmFormat {
        self.source
    }

    pub fn target(&self) -> PcmFormat {
        self.target
    }

    /// Output frame count for a given input frame count:
    /// `round(input × target_rate / source_rate)`.
    pub fn target_frames(&self, input_frames: usize) -> usize {
        let ratio = f64::from(self.target.sample_rate) / f64::from(self.source.sample_rate);
        (input_frames as f64 * ratio).round() as usize
    }

    /// Convert one buffer from the source format to the target format.
    ///
    /// Fails if the buffer is not tagged with the configured source format;
    /// the caller reports the failure instead of dropping audio silently.
    pub fn convert(&self, input: &PcmBuffer) -> Result<PcmBuffer, FormatError> {
        if input.format() != self.source || !input.kind_matches() {
            return Err(FormatError::UnexpectedInput {
                expected: self.source.to_string(),
                actual: input.format().to_string(),
            });
        }

        // Normalize to f32 for mixing and interpolation.
        let normalized: Vec<f32> = match input.samples() {
            Samples::I16(v) => v.iter().copied().map(i16_to_f32).collect(),
            Samples::F32(v) => v.clone(),
        };

        let mixed = mix_channels(&normalized, self.source.channels, self.target.channels);

        let frames = mixed.len() / self.target.channels as usize;
        let out_frames = self.target_frames(frames);
        let resampled = resample(
            &mixed,
            self.target.channels,
            out_frames,
            self.source.sample_rate,
            self.target.sample_rate,
        );

        Ok(match self.target.kind {
            SampleKind::I16 => PcmBuffer::from_i16(
                resampled.iter().copied().map(f32_to_i16).collect(),
                self.target,
            ),
            SampleKind::F32 => PcmBuffer::from_f32(resampled, self.target),
        })
    }

}

/// Mono↔stereo mixing: duplicate up, average down. Equal counts pass through.
fn mix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    match (from, to) {
        (f, t) if f == t => samples.to_vec(),
        (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) * 0.5)
            .collect(),
        // Channel counts are validated at construction.
        _ => samples.to_vec(),
    }
}

/// Linear-interpolation resampling of interleaved frames.
///
/// `out_frames` is fixed by the caller so the frame-count law
/// (`round(n × to/from)`) holds exactly regardless of rounding inside the
/// interpolation walk.
fn resample(samples: &[f32], channels: u16, out_frames: usize, from: u32, to: u32) -> Vec<f32> {
    let ch = channels as usize;
    let in_frames = samples.len() / ch;
    if from == to || in_frames == 0 {
        let mut out = samples.to_vec();
        out.truncate(out_frames * ch);
        return out;
    }

    let ratio = f64::from(to) / f64::from(from);
    let mut out = Vec::with_capacity(out_frames * ch);

    for i in 0..out_frames {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        for c in 0..ch {
            let s1 = sample_at(samples, ch, in_frames, src_idx, c);
            let s2 = sample_at(samples, ch, in_frames, src_idx + 1, c);
            out.push(s1 + (s2 - s1) * frac);
        }
    }

    out
}

/// Sample lookup clamped to the final frame.
#[inline]
fn sample_at(samples: &[f32], channels: usize, frames: usize, frame: usize, channel: usize) -> f32 {
    if frames == 0 {
        return 0.0;
    }
    let frame = frame.min(frames - 1);
    samples[frame * channels + channel]
}

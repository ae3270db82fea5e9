//! Audio buffers and the sample-level operations used for stitching.
//!
//! Everything is mono f32 in [-1.0, 1.0]. WAV in and out goes through `hound`.

use crate::error::{ProsodyError, ProsodyResult};
use rand::{Rng, RngCore};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

/// Mono PCM samples at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Samples (f32, normalized to -1.0..1.0)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        Self::new(vec![0.0; samples_for(duration, sample_rate)], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        duration_of(self.samples.len(), self.sample_rate)
    }

    /// Decode a WAV file held in memory. Multi-channel input is downmixed.
    pub fn from_wav_bytes(bytes: &[u8]) -> ProsodyResult<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        decode_wav(reader)
    }

    pub fn from_wav_file(path: &Path) -> ProsodyResult<Self> {
        let reader = hound::WavReader::open(path)?;
        decode_wav(reader)
    }

    /// Encode as 16-bit PCM mono WAV.
    pub fn to_wav_bytes(&self) -> ProsodyResult<Vec<u8>> {
        if self.sample_rate == 0 {
            return Err(ProsodyError::Audio("sample_rate must be > 0".into()));
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Cursor::new(Vec::<u8>::new());
        {
            let mut w = hound::WavWriter::new(&mut buf, spec)?;
            for s in f32_to_pcm16(&self.samples) {
                w.write_sample(s)?;
            }
            w.finalize()?;
        }
        Ok(buf.into_inner())
    }
}

fn decode_wav<R: std::io::Read>(mut reader: hound::WavReader<R>) -> ProsodyResult<AudioBuffer> {
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };
    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok(AudioBuffer::new(samples, spec.sample_rate))
}

/// Playback time of `samples` samples at `sample_rate`.
pub fn duration_of(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(nanos as u64)
}

/// Number of samples covering `duration` at `sample_rate` (rounded).
pub fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize
}

pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&x| {
            let x = x.clamp(-1.0, 1.0);
            // -1.0 -> -32768, +1.0 -> 32767
            if x >= 0.0 {
                (x * 32767.0).round() as i16
            } else {
                (x * 32768.0).round() as i16
            }
        })
        .collect()
}

pub fn pcm16_le_bytes(samples: &[f32]) -> Vec<u8> {
    f32_to_pcm16(samples)
        .into_iter()
        .flat_map(i16::to_le_bytes)
        .collect()
}

pub fn f32_le_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// 44-byte header for a 16-bit mono WAV of unknown length, for streaming.
/// Size fields are set to the maximum so players read until EOF.
pub fn streaming_wav_header(sample_rate: u32) -> Vec<u8> {
    let byte_rate = sample_rate * 2;
    let mut h = Vec::with_capacity(44);
    h.extend_from_slice(b"RIFF");
    h.extend_from_slice(&u32::MAX.to_le_bytes());
    h.extend_from_slice(b"WAVE");
    h.extend_from_slice(b"fmt ");
    h.extend_from_slice(&16u32.to_le_bytes());
    h.extend_from_slice(&1u16.to_le_bytes()); // PCM
    h.extend_from_slice(&1u16.to_le_bytes()); // mono
    h.extend_from_slice(&sample_rate.to_le_bytes());
    h.extend_from_slice(&byte_rate.to_le_bytes());
    h.extend_from_slice(&2u16.to_le_bytes());
    h.extend_from_slice(&16u16.to_le_bytes());
    h.extend_from_slice(b"data");
    h.extend_from_slice(&(u32::MAX - 36).to_le_bytes());
    h
}

/// Linear crossfade: `tail` fades out while the start of `head` fades in.
///
/// The overlap is `tail.len()` samples (clamped to `head.len()`); the result
/// replaces the overlapped part of `head`.
pub fn crossfade_into(tail: &[f32], head: &mut [f32]) {
    let n = tail.len().min(head.len());
    if n == 0 {
        return;
    }
    for i in 0..n {
        let t = (i + 1) as f32 / (n + 1) as f32;
        head[i] = tail[i] * (1.0 - t) + head[i] * t;
    }
}

/// Add `overlay` (scaled by `gain`) into `base` starting at sample 0,
/// growing `base` with silence if the overlay is longer.
pub fn mix_into(base: &mut Vec<f32>, overlay: &[f32], gain: f32) {
    if base.len() < overlay.len() {
        base.resize(overlay.len(), 0.0);
    }
    for (b, o) in base.iter_mut().zip(overlay) {
        *b = (*b + o * gain).clamp(-1.0, 1.0);
    }
}

/// Breath sound used when no asset file is configured: a short burst of
/// low-level noise under a raised-sine envelope, smoothed to take off the hiss.
pub fn synthesize_breath(
    sample_rate: u32,
    duration: Duration,
    rng: &mut dyn RngCore,
) -> AudioBuffer {
    let n = samples_for(duration, sample_rate);
    let mut samples = Vec::with_capacity(n);
    let mut smoothed = 0.0f32;
    for i in 0..n {
        let noise: f32 = rng.gen_range(-1.0..1.0);
        smoothed = 0.85 * smoothed + 0.15 * noise;
        let phase = i as f32 / n.max(1) as f32;
        let envelope = (std::f32::consts::PI * phase).sin().powi(2);
        samples.push(smoothed * envelope * 0.12);
    }
    AudioBuffer::new(samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn silence_length_is_sample_accurate() {
        let s = AudioBuffer::silence(Duration::from_millis(350), 24_000);
        assert_eq!(s.len(), 8_400);
        assert!(s.samples.iter().all(|&x| x == 0.0));
        assert_eq!(s.duration(), Duration::from_millis(350));
    }

    #[test]
    fn wav_round_trip_keeps_rate_and_length() {
        let buf = AudioBuffer::new(vec![0.0, 0.5, -0.5, 1.0, -1.0], 16_000);
        let bytes = buf.to_wav_bytes().unwrap();
        let back = AudioBuffer::from_wav_bytes(&bytes).unwrap();
        assert_eq!(back.sample_rate, 16_000);
        assert_eq!(back.len(), 5);
        assert!((back.samples[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn garbage_is_not_a_wav() {
        assert!(AudioBuffer::from_wav_bytes(b"not a wav at all").is_err());
    }

    #[test]
    fn crossfade_moves_from_tail_to_head() {
        let tail = vec![1.0; 4];
        let mut head = vec![0.0; 6];
        crossfade_into(&tail, &mut head);
        assert!(head[0] > head[3]);
        assert!(head[3] > 0.0);
        assert_eq!(head[4], 0.0);
    }

    #[test]
    fn mix_extends_short_base() {
        let mut base = vec![0.1, 0.1];
        mix_into(&mut base, &[0.5, 0.5, 0.5], 1.0);
        assert_eq!(base.len(), 3);
        assert!((base[0] - 0.6).abs() < 1e-6);
        assert!((base[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn breath_is_quiet_and_deterministic() {
        let mut a = ChaCha20Rng::seed_from_u64(7);
        let mut b = ChaCha20Rng::seed_from_u64(7);
        let x = synthesize_breath(24_000, Duration::from_millis(250), &mut a);
        let y = synthesize_breath(24_000, Duration::from_millis(250), &mut b);
        assert_eq!(x, y);
        assert_eq!(x.len(), 6_000);
        assert!(x.samples.iter().all(|s| s.abs() <= 0.12));
        assert!(x.samples.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn streaming_header_layout() {
        let h = streaming_wav_header(24_000);
        assert_eq!(h.len(), 44);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(&h[36..40], b"data");
        assert_eq!(u32::from_le_bytes([h[24], h[25], h[26], h[27]]), 24_000);
    }

    #[test]
    fn pcm_conversions() {
        assert_eq!(f32_to_pcm16(&[1.0, -1.0, 0.0, 2.0]), vec![32767, -32768, 0, 32767]);
        assert_eq!(pcm16_le_bytes(&[1.0]), vec![0xFF, 0x7F]);
        assert_eq!(f32_le_bytes(&[0.0]).len(), 4);
    }
}

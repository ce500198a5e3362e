//! WAV loading for the demo player.
//!
//! Reads a WAV file and converts it to the negotiated stream layout:
//! interleaved 16-bit PCM at the session's rate and channel count.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::info;

/// Interleaved PCM in the layout the session expects.
#[derive(Debug)]
pub struct AudioData {
    // ---
    /// Interleaved samples
    pub samples: Vec<i16>,

    pub channels: usize,

    pub sample_rate: u32,
}

impl AudioData {
    // ---
    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> usize {
        // ---
        self.channels * 2
    }

    pub fn frame_count(&self) -> usize {
        // ---
        self.samples.len() / self.channels.max(1)
    }

    /// Returns the total duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        // ---
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// Samples as host-order bytes, ready to hand to a session.
    pub fn to_host_bytes(&self) -> Vec<u8> {
        // ---
        self.samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }
}

/// Reads a WAV file and converts it to `channels` x `sample_rate`.
///
/// # Arguments
///
/// * `path` - Path to the WAV file
/// * `channels` - Target channel count (1 or 2)
/// * `sample_rate` - Target rate in Hz
///
/// # Errors
///
/// Returns error if:
/// - File cannot be opened
/// - WAV format is invalid
/// - Sample format is neither 16-bit PCM nor 32-bit float
pub fn read_wav<P: AsRef<Path>>(path: P, channels: usize, sample_rate: u32) -> Result<AudioData> {
    // ---
    let path = path.as_ref();
    info!("Reading WAV file: {}", path.display());

    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();
    info!(
        "WAV format: {}Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let raw: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 16-bit PCM WAV samples")?,

        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 32-bit float WAV samples")?
            .into_iter()
            .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
            .collect(),

        (SampleFormat::Int, bits) => {
            anyhow::bail!("unsupported integer PCM WAV format: {bits}-bit (only 16-bit PCM is supported)");
        }
        (SampleFormat::Float, bits) => {
            anyhow::bail!("unsupported float WAV format: {bits}-bit (only 32-bit float is supported)");
        }
    };

    let source_channels = usize::from(spec.channels);
    if source_channels == 0 || channels == 0 {
        anyhow::bail!("channel count must be non-zero");
    }

    let mut planes = split_channels(&raw, source_channels, channels);
    if spec.sample_rate != sample_rate {
        info!("Resampling from {}Hz to {}Hz", spec.sample_rate, sample_rate);
        for plane in &mut planes {
            *plane = resample_linear(plane, spec.sample_rate, sample_rate);
        }
    }

    let samples = interleave(&planes);
    let audio = AudioData {
        samples,
        channels,
        sample_rate,
    };
    info!(
        "Converted to {}Hz x {} channels: {} frames ({:.2}s)",
        sample_rate,
        channels,
        audio.frame_count(),
        audio.duration_secs()
    );
    Ok(audio)
}

/// Splits interleaved audio into `target` channel planes.
///
/// Mono targets average all source channels; a mono source is copied to
/// every target channel; otherwise the first `target` channels are kept.
fn split_channels(samples: &[i16], source: usize, target: usize) -> Vec<Vec<i16>> {
    // ---
    let frames = samples.len() / source;
    let mut planes = vec![Vec::with_capacity(frames); target];

    for frame in samples.chunks_exact(source) {
        if target == 1 {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            planes[0].push((sum / source as i32) as i16);
        } else {
            for (ch, plane) in planes.iter_mut().enumerate() {
                plane.push(frame[ch.min(source - 1)]);
            }
        }
    }
    planes
}

fn interleave(planes: &[Vec<i16>]) -> Vec<i16> {
    // ---
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            out.push(plane[i]);
        }
    }
    out
}

/// Resamples one channel using linear interpolation.
fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    // ---
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;

        if src_idx >= samples.len() - 1 {
            resampled.push(samples[samples.len() - 1]);
        } else {
            let frac = src_pos - src_idx as f64;
            let s0 = f64::from(samples[src_idx]);
            let s1 = f64::from(samples[src_idx + 1]);
            resampled.push((s0 + (s1 - s0) * frac) as i16);
        }
    }

    resampled
}

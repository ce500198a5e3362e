//! SBC encode adapter.
//!
//! Wraps the SBC encoder behind [`FrameEncoder`] so the encode path only
//! sees "one full PCM window in, one compressed frame out".

use crate::error::{Error, Result};
use crate::sbc::{SbcEncoder, SbcParams};

/// One compressed frame produced from a full accumulation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrame {
    // ---
    /// PCM bytes the encoder consumed
    pub consumed: usize,

    /// Length of the compressed frame
    pub len: usize,
}

/// Encoder driven by the encode path.
pub trait FrameEncoder {
    // ---
    /// PCM bytes per encoder call.
    fn codesize(&self) -> usize;

    /// Upper bound on the length of one compressed frame.
    fn frame_length(&self) -> usize;

    /// Audio frames represented by one compressed frame.
    fn samples_per_frame(&self) -> usize;

    /// Encodes `pcm` (exactly one codesize, wire byte order) into `out`.
    ///
    /// `out` is cleared first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the codec consumed nothing or refused
    /// the input.
    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<EncodedFrame>;
}

/// SBC encoder wrapper used by sessions.
///
/// # Example
///
/// ```
/// use bt_pcm::codec::{FrameEncoder, SbcEncoderWrapper};
/// use bt_pcm::sbc::{Allocation, ChannelMode, SamplingFrequency, SbcParams};
///
/// let params = SbcParams::new(
///     SamplingFrequency::F44100,
///     ChannelMode::JointStereo,
///     16,
///     8,
///     Allocation::Loudness,
///     32,
/// )
/// .unwrap();
/// let mut encoder = SbcEncoderWrapper::new(params);
/// let pcm = vec![0u8; encoder.codesize()];
/// let mut frame = Vec::new();
/// let encoded = encoder.encode(&pcm, &mut frame).unwrap();
/// assert_eq!(encoded.len, params.frame_length());
/// ```
pub struct SbcEncoderWrapper {
    // ---
    encoder: SbcEncoder,
}

impl SbcEncoderWrapper {
    // ---
    pub fn new(params: SbcParams) -> Self {
        // ---
        Self {
            encoder: SbcEncoder::new(params),
        }
    }

    pub fn params(&self) -> &SbcParams {
        // ---
        self.encoder.params()
    }
}

impl FrameEncoder for SbcEncoderWrapper {
    fn codesize(&self) -> usize {
        // ---
        self.encoder.params().codesize()
    }

    fn frame_length(&self) -> usize {
        // ---
        self.encoder.params().frame_length()
    }

    fn samples_per_frame(&self) -> usize {
        // ---
        self.encoder.params().samples_per_frame()
    }

    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<EncodedFrame> {
        // ---
        out.clear();
        let consumed = self
            .encoder
            .encode(pcm, out)
            .map_err(|e| Error::Encode(e.to_string()))?;

        if consumed == 0 || out.is_empty() {
            return Err(Error::Encode("encoder produced no output".to_string()));
        }

        Ok(EncodedFrame {
            consumed,
            len: out.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::sbc::{Allocation, ChannelMode, SamplingFrequency, SYNCWORD};

    fn mono_params() -> SbcParams {
        // ---
        SbcParams::new(
            SamplingFrequency::F16000,
            ChannelMode::Mono,
            8,
            4,
            Allocation::Snr,
            16,
        )
        .expect("valid params")
    }

    #[test]
    fn test_encode_full_window() {
        // ---
        let params = mono_params();
        let mut encoder = SbcEncoderWrapper::new(params);
        let pcm = vec![0u8; encoder.codesize()];
        let mut frame = Vec::new();

        let encoded = encoder.encode(&pcm, &mut frame).expect("encode");

        assert_eq!(encoded.consumed, params.codesize());
        assert_eq!(encoded.len, frame.len());
        assert_eq!(frame.len(), encoder.frame_length());
        assert_eq!(frame[0], SYNCWORD);
    }

    #[test]
    fn test_short_window_is_encode_error() {
        // ---
        let mut encoder = SbcEncoderWrapper::new(mono_params());
        let mut frame = vec![1, 2, 3];

        let err = encoder.encode(&[0u8; 4], &mut frame).unwrap_err();

        assert!(matches!(err, Error::Encode(_)));
        assert!(frame.is_empty());
    }

    #[test]
    fn test_output_buffer_is_reused() {
        // ---
        let mut encoder = SbcEncoderWrapper::new(mono_params());
        let pcm = vec![0u8; encoder.codesize()];
        let mut frame = Vec::new();

        encoder.encode(&pcm, &mut frame).expect("first");
        encoder.encode(&pcm, &mut frame).expect("second");

        assert_eq!(frame.len(), encoder.frame_length());
    }
}

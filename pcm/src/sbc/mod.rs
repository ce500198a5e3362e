//! Low-complexity sub-band codec (SBC) encoder.
//!
//! A2DP's mandatory codec. Each frame covers `blocks x subbands` samples per
//! channel: a polyphase analysis filter splits the input into subbands, every
//! subband gets a 4-bit scale factor, the frame bitpool is spread over the
//! subbands by the bit allocator, and the quantized samples are packed
//! behind a CRC-protected header.
//!
//! Input is interleaved 16-bit PCM in big-endian byte order.

mod bitalloc;
mod tables;

use std::f64::consts::PI;

use crate::error::{Error, Result};
use tables::{PROTO_4_40, PROTO_8_80};

/// First byte of every SBC frame.
pub const SYNCWORD: u8 = 0x9C;

pub(crate) const MAX_SUBBANDS: usize = 8;
const MAX_CHANNELS: usize = 2;
const MAX_BLOCKS: usize = 16;

/// Errors raised by the SBC encoder itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SbcError {
    #[error("need {need} bytes of PCM, got {got}")]
    ShortInput { need: usize, got: usize },
}

/// SBC sampling frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingFrequency {
    F16000,
    F32000,
    F44100,
    F48000,
}

impl SamplingFrequency {
    // ---
    pub fn from_hz(hz: u32) -> Option<Self> {
        // ---
        match hz {
            16000 => Some(Self::F16000),
            32000 => Some(Self::F32000),
            44100 => Some(Self::F44100),
            48000 => Some(Self::F48000),
            _ => None,
        }
    }

    pub fn hz(self) -> u32 {
        // ---
        match self {
            Self::F16000 => 16000,
            Self::F32000 => 32000,
            Self::F44100 => 44100,
            Self::F48000 => 48000,
        }
    }

    /// Two-bit header code, also the row of the loudness offset tables.
    pub(crate) fn index(self) -> usize {
        // ---
        match self {
            Self::F16000 => 0,
            Self::F32000 => 1,
            Self::F44100 => 2,
            Self::F48000 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Mono,
    DualChannel,
    Stereo,
    JointStereo,
}

impl ChannelMode {
    // ---
    pub fn channels(self) -> usize {
        // ---
        match self {
            Self::Mono => 1,
            _ => 2,
        }
    }

    fn code(self) -> u8 {
        // ---
        match self {
            Self::Mono => 0,
            Self::DualChannel => 1,
            Self::Stereo => 2,
            Self::JointStereo => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Loudness,
    Snr,
}

/// Validated encoder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcParams {
    // ---
    pub frequency: SamplingFrequency,
    pub channel_mode: ChannelMode,
    pub blocks: u8,
    pub subbands: u8,
    pub allocation: Allocation,
    pub bitpool: u8,
}

impl SbcParams {
    // ---
    /// Checks the combination can drive the encoder.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for block or subband counts SBC does not
    /// define, or a bitpool outside `2..=16*subbands` per channel
    /// (`2..=32*subbands` for stereo modes).
    pub fn new(
        frequency: SamplingFrequency,
        channel_mode: ChannelMode,
        blocks: u8,
        subbands: u8,
        allocation: Allocation,
        bitpool: u8,
    ) -> Result<Self> {
        // ---
        if !matches!(blocks, 4 | 8 | 12 | 16) {
            return Err(Error::config(format!("invalid SBC block count {blocks}")));
        }
        if !matches!(subbands, 4 | 8) {
            return Err(Error::config(format!("invalid SBC subband count {subbands}")));
        }

        let max_bitpool = match channel_mode {
            ChannelMode::Mono | ChannelMode::DualChannel => 16 * u32::from(subbands),
            ChannelMode::Stereo | ChannelMode::JointStereo => 32 * u32::from(subbands),
        };
        if bitpool < 2 || u32::from(bitpool) > max_bitpool {
            return Err(Error::config(format!(
                "SBC bitpool {bitpool} outside 2..={max_bitpool}"
            )));
        }

        Ok(Self {
            frequency,
            channel_mode,
            blocks,
            subbands,
            allocation,
            bitpool,
        })
    }

    pub fn channels(&self) -> usize {
        // ---
        self.channel_mode.channels()
    }

    /// PCM bytes consumed per frame.
    pub fn codesize(&self) -> usize {
        // ---
        usize::from(self.subbands) * usize::from(self.blocks) * self.channels() * 2
    }

    /// PCM frames (samples per channel) covered by one SBC frame.
    pub fn samples_per_frame(&self) -> usize {
        // ---
        usize::from(self.subbands) * usize::from(self.blocks)
    }

    /// Encoded frame length in bytes.
    pub fn frame_length(&self) -> usize {
        // ---
        let m = usize::from(self.subbands);
        let b = usize::from(self.blocks);
        let bitpool = usize::from(self.bitpool);
        let nch = self.channels();

        let audio_bits = match self.channel_mode {
            ChannelMode::Mono | ChannelMode::DualChannel => b * nch * bitpool,
            ChannelMode::Stereo => b * bitpool,
            ChannelMode::JointStereo => m + b * bitpool,
        };
        4 + (4 * m * nch) / 8 + audio_bits.div_ceil(8)
    }

    fn header_byte(&self) -> u8 {
        // ---
        let blocks = (self.blocks / 4) - 1;
        let allocation = u8::from(self.allocation == Allocation::Snr);
        let subbands = u8::from(self.subbands == 8);

        ((self.frequency.index() as u8) << 6)
            | (blocks << 4)
            | (self.channel_mode.code() << 2)
            | (allocation << 1)
            | subbands
    }
}

/// MSB-first bit packer.
struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u32,
    nbits: u32,
}

impl<'a> BitWriter<'a> {
    // ---
    fn new(out: &'a mut Vec<u8>) -> Self {
        // ---
        Self { out, acc: 0, nbits: 0 }
    }

    fn put(&mut self, value: u32, bits: u32) {
        // ---
        debug_assert!(bits <= 16);
        self.acc = (self.acc << bits) | (value & ((1 << bits) - 1));
        self.nbits += bits;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.out.push((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1 << self.nbits) - 1;
    }

    /// Pads the last partial byte with zeros.
    fn finish(mut self) {
        // ---
        if self.nbits > 0 {
            let pad = 8 - self.nbits;
            self.put(0, pad);
        }
    }
}

/// CRC-8 (x^8 + x^4 + x^3 + x^2 + 1, init 0x0F) over the first `bits` bits.
fn crc8(data: &[u8], bits: usize) -> u8 {
    // ---
    let mut crc: u8 = 0x0F;
    for i in 0..bits {
        let bit = (data[i / 8] >> (7 - i % 8)) & 1;
        let top = crc >> 7;
        crc <<= 1;
        if top ^ bit == 1 {
            crc ^= 0x1D;
        }
    }
    crc
}

/// Smallest scale factor `sf` with `|x| < 2^(sf + 1)`, capped at 15.
fn scale_factor(peak: f64) -> u8 {
    // ---
    let mut sf = 0u8;
    while sf < 15 && peak >= f64::from(2u32 << sf) {
        sf += 1;
    }
    sf
}

fn quantize(sample: f64, sf: u8, bits: u8) -> u32 {
    // ---
    let levels = f64::from((1u32 << bits) - 1);
    let scale = f64::from(2u32 << sf);
    let q = ((sample / scale + 1.0) * levels / 2.0).floor();
    q.clamp(0.0, levels) as u32
}

/// Stateful SBC encoder; the analysis history carries across frames.
pub struct SbcEncoder {
    // ---
    params: SbcParams,
    window: &'static [f64],
    /// cos((k + 0.5)(i - M/2)pi/M), row-major `[k][i]`
    matrix: Vec<f64>,
    history: [[f64; 10 * MAX_SUBBANDS]; MAX_CHANNELS],
    samples: [[[f64; MAX_SUBBANDS]; MAX_BLOCKS]; MAX_CHANNELS],
}

impl SbcEncoder {
    // ---
    pub fn new(params: SbcParams) -> Self {
        // ---
        let m = usize::from(params.subbands);
        let window: &'static [f64] = if m == 4 { &PROTO_4_40 } else { &PROTO_8_80 };

        let mut matrix = Vec::with_capacity(m * 2 * m);
        for k in 0..m {
            for i in 0..2 * m {
                let phase = (k as f64 + 0.5) * (i as f64 - m as f64 / 2.0) * PI / m as f64;
                matrix.push(phase.cos());
            }
        }

        Self {
            params,
            window,
            matrix,
            history: [[0.0; 10 * MAX_SUBBANDS]; MAX_CHANNELS],
            samples: [[[0.0; MAX_SUBBANDS]; MAX_BLOCKS]; MAX_CHANNELS],
        }
    }

    pub fn params(&self) -> &SbcParams {
        // ---
        &self.params
    }

    /// Encodes one frame from `pcm`, appending it to `out`.
    ///
    /// Returns the number of PCM bytes consumed (always the codesize).
    ///
    /// # Errors
    ///
    /// Returns `SbcError::ShortInput` if `pcm` holds less than one codesize.
    pub fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> std::result::Result<usize, SbcError> {
        // ---
        let codesize = self.params.codesize();
        if pcm.len() < codesize {
            return Err(SbcError::ShortInput {
                need: codesize,
                got: pcm.len(),
            });
        }

        let m = usize::from(self.params.subbands);
        let blocks = usize::from(self.params.blocks);
        let nch = self.params.channels();

        for blk in 0..blocks {
            for ch in 0..nch {
                let mut input = [0.0f64; MAX_SUBBANDS];
                for (i, slot) in input.iter_mut().enumerate().take(m) {
                    let idx = ((blk * m + i) * nch + ch) * 2;
                    *slot = f64::from(i16::from_be_bytes([pcm[idx], pcm[idx + 1]]));
                }
                self.analyze(ch, &input[..m], blk);
            }
        }

        let mut scale_factors = [[0u8; MAX_SUBBANDS]; MAX_CHANNELS];
        for ch in 0..nch {
            for sb in 0..m {
                scale_factors[ch][sb] = scale_factor(self.peak(ch, sb));
            }
        }

        let join = if self.params.channel_mode == ChannelMode::JointStereo {
            self.apply_joint_stereo(&mut scale_factors)
        } else {
            0
        };

        let mut bits = [[0u8; MAX_SUBBANDS]; MAX_CHANNELS];
        bitalloc::allocate(&self.params, &scale_factors, &mut bits);

        self.pack(&scale_factors, &bits, join, out);
        Ok(codesize)
    }

    /// Polyphase analysis of `m` new samples into block `blk`.
    fn analyze(&mut self, ch: usize, input: &[f64], blk: usize) {
        // ---
        let m = input.len();
        let history = &mut self.history[ch];

        history.copy_within(0..9 * m, m);
        for (i, &sample) in input.iter().enumerate() {
            history[m - 1 - i] = sample;
        }

        let mut y = [0.0f64; 2 * MAX_SUBBANDS];
        for (i, acc) in y.iter_mut().enumerate().take(2 * m) {
            *acc = (0..5)
                .map(|j| self.window[i + j * 2 * m] * history[i + j * 2 * m])
                .sum();
        }

        for k in 0..m {
            let row = &self.matrix[k * 2 * m..(k + 1) * 2 * m];
            self.samples[ch][blk][k] = row.iter().zip(&y).map(|(c, v)| c * v).sum();
        }
    }

    fn peak(&self, ch: usize, sb: usize) -> f64 {
        // ---
        let blocks = usize::from(self.params.blocks);
        self.samples[ch][..blocks]
            .iter()
            .map(|block| block[sb].abs())
            .fold(0.0, f64::max)
    }

    /// Switches subbands to mid/side where that needs smaller scale factors.
    ///
    /// Returns the join bitmap, subband 0 in the most significant of
    /// `subbands` bits. The last subband is never joined.
    fn apply_joint_stereo(&mut self, scale_factors: &mut [[u8; MAX_SUBBANDS]; MAX_CHANNELS]) -> u32 {
        // ---
        let m = usize::from(self.params.subbands);
        let blocks = usize::from(self.params.blocks);
        let mut join = 0u32;

        for sb in 0..m - 1 {
            let (mut mid_peak, mut side_peak) = (0.0f64, 0.0f64);
            for blk in 0..blocks {
                let (l, r) = (self.samples[0][blk][sb], self.samples[1][blk][sb]);
                mid_peak = mid_peak.max(((l + r) / 2.0).abs());
                side_peak = side_peak.max(((l - r) / 2.0).abs());
            }

            let (sf_mid, sf_side) = (scale_factor(mid_peak), scale_factor(side_peak));
            let separate = u32::from(scale_factors[0][sb]) + u32::from(scale_factors[1][sb]);
            if u32::from(sf_mid) + u32::from(sf_side) < separate {
                join |= 1 << (m - 1 - sb);
                scale_factors[0][sb] = sf_mid;
                scale_factors[1][sb] = sf_side;
                for blk in 0..blocks {
                    let (l, r) = (self.samples[0][blk][sb], self.samples[1][blk][sb]);
                    self.samples[0][blk][sb] = (l + r) / 2.0;
                    self.samples[1][blk][sb] = (l - r) / 2.0;
                }
            }
        }
        join
    }

    fn pack(
        &self,
        scale_factors: &[[u8; MAX_SUBBANDS]; MAX_CHANNELS],
        bits: &[[u8; MAX_SUBBANDS]; MAX_CHANNELS],
        join: u32,
        out: &mut Vec<u8>,
    ) {
        // ---
        let m = usize::from(self.params.subbands);
        let blocks = usize::from(self.params.blocks);
        let nch = self.params.channels();
        let start = out.len();

        // Fields covered by the CRC, collected separately.
        let mut covered = Vec::with_capacity(16);
        covered.push(self.params.header_byte());
        covered.push(self.params.bitpool);
        let mut covered_bits = 16;
        {
            let mut w = BitWriter::new(&mut covered);
            if self.params.channel_mode == ChannelMode::JointStereo {
                w.put(join, m as u32);
                covered_bits += m;
            }
            for ch_sfs in scale_factors.iter().take(nch) {
                for &sf in ch_sfs.iter().take(m) {
                    w.put(u32::from(sf), 4);
                    covered_bits += 4;
                }
            }
            w.finish();
        }
        let crc = crc8(&covered, covered_bits);

        out.push(SYNCWORD);
        out.push(covered[0]);
        out.push(covered[1]);
        out.push(crc);

        let mut w = BitWriter::new(out);
        if self.params.channel_mode == ChannelMode::JointStereo {
            w.put(join, m as u32);
        }
        for ch_sfs in scale_factors.iter().take(nch) {
            for &sf in ch_sfs.iter().take(m) {
                w.put(u32::from(sf), 4);
            }
        }
        for blk in 0..blocks {
            for ch in 0..nch {
                for sb in 0..m {
                    let b = bits[ch][sb];
                    if b > 0 {
                        let q = quantize(self.samples[ch][blk][sb], scale_factors[ch][sb], b);
                        w.put(q, u32::from(b));
                    }
                }
            }
        }
        w.finish();

        // An allocation that saturated every subband leaves the tail unused.
        out.resize(start + self.params.frame_length(), 0);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn params(mode: ChannelMode, subbands: u8, bitpool: u8) -> SbcParams {
        // ---
        SbcParams::new(SamplingFrequency::F44100, mode, 16, subbands, Allocation::Loudness, bitpool)
            .expect("valid params")
    }

    fn tone(params: &SbcParams, amplitude: f64) -> Vec<u8> {
        // ---
        let frames = params.samples_per_frame();
        let nch = params.channels();
        let mut pcm = Vec::with_capacity(params.codesize());
        for n in 0..frames {
            let s = (amplitude * (2.0 * PI * 1000.0 * n as f64 / 44100.0).sin()) as i16;
            for _ in 0..nch {
                pcm.extend_from_slice(&s.to_be_bytes());
            }
        }
        pcm
    }

    #[test]
    fn test_frame_length_formula() {
        // ---
        // Common A2DP "high quality" joint stereo setting.
        assert_eq!(params(ChannelMode::JointStereo, 8, 53).frame_length(), 119);
        assert_eq!(params(ChannelMode::Mono, 8, 31).frame_length(), 70);
        assert_eq!(params(ChannelMode::Stereo, 4, 32).frame_length(), 72);
        assert_eq!(params(ChannelMode::DualChannel, 8, 16).frame_length(), 76);
    }

    #[test]
    fn test_invalid_params_rejected() {
        // ---
        let f = SamplingFrequency::F48000;
        assert!(SbcParams::new(f, ChannelMode::Mono, 5, 8, Allocation::Snr, 20).is_err());
        assert!(SbcParams::new(f, ChannelMode::Mono, 16, 6, Allocation::Snr, 20).is_err());
        assert!(SbcParams::new(f, ChannelMode::Mono, 16, 8, Allocation::Snr, 1).is_err());
        assert!(SbcParams::new(f, ChannelMode::Mono, 16, 4, Allocation::Snr, 65).is_err());
        assert!(SbcParams::new(f, ChannelMode::Stereo, 16, 4, Allocation::Snr, 128).is_ok());
    }

    #[test]
    fn test_encode_produces_header_and_length() {
        // ---
        let p = params(ChannelMode::JointStereo, 8, 53);
        let mut encoder = SbcEncoder::new(p);
        let mut out = Vec::new();

        let consumed = encoder.encode(&tone(&p, 8000.0), &mut out).expect("encode");

        assert_eq!(consumed, p.codesize());
        assert_eq!(out.len(), p.frame_length());
        assert_eq!(out[0], SYNCWORD);
        // 44.1kHz, 16 blocks, joint stereo, loudness, 8 subbands
        assert_eq!(out[1], 0b10_11_11_0_1);
        assert_eq!(out[2], 53);
    }

    #[test]
    fn test_crc_covers_header_and_scale_factors() {
        // ---
        let p = params(ChannelMode::Mono, 4, 20);
        let mut encoder = SbcEncoder::new(p);
        let mut out = Vec::new();
        encoder.encode(&tone(&p, 12000.0), &mut out).expect("encode");

        // Mono, 4 subbands: header bytes 1-2 plus 16 bits of scale factors.
        let covered = [out[1], out[2], out[4], out[5]];
        assert_eq!(crc8(&covered, 32), out[3]);
    }

    #[test]
    fn test_silence_has_zero_scale_factors() {
        // ---
        let p = params(ChannelMode::Stereo, 8, 35);
        let mut encoder = SbcEncoder::new(p);
        let mut out = Vec::new();
        encoder.encode(&vec![0u8; p.codesize()], &mut out).expect("encode");

        // 2 channels x 8 subbands x 4 bits = 8 bytes of scale factors.
        assert!(out[4..12].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_loud_input_raises_scale_factors() {
        // ---
        let p = params(ChannelMode::Mono, 8, 31);
        let mut encoder = SbcEncoder::new(p);
        let pcm = tone(&p, 20000.0);

        // Second frame sees a warm filter history.
        let mut out = Vec::new();
        encoder.encode(&pcm, &mut out).expect("encode");
        out.clear();
        encoder.encode(&pcm, &mut out).expect("encode");

        let max_sf = out[4..8].iter().flat_map(|b| [b >> 4, b & 0x0F]).max().unwrap_or(0);
        assert!(max_sf >= 10, "max scale factor {max_sf}");
    }

    #[test]
    fn test_short_input_rejected() {
        // ---
        let p = params(ChannelMode::Mono, 8, 31);
        let mut encoder = SbcEncoder::new(p);
        let mut out = Vec::new();

        let err = encoder.encode(&[0u8; 10], &mut out).unwrap_err();
        assert_eq!(err, SbcError::ShortInput { need: 256, got: 10 });
        assert!(out.is_empty());
    }

    #[test]
    fn test_scale_factor_bounds() {
        // ---
        assert_eq!(scale_factor(0.0), 0);
        assert_eq!(scale_factor(1.99), 0);
        assert_eq!(scale_factor(2.0), 1);
        assert_eq!(scale_factor(1.0e9), 15);
    }
}

//! RTP/AVDTP media packet headers.
//!
//! A2DP media packets carry a 12-byte RTP fixed header (RFC 3550) followed
//! by a 1-byte SBC payload descriptor and the concatenated SBC frames.
//! Both headers are packed and unpacked bit by bit on plain byte arrays so
//! the layout does not depend on any compiler bit-field convention.

use anyhow::Result;

/// RTP packet version 2 (as per RFC 3550)
pub const RTP_VERSION: u8 = 2;

/// Payload type used by the A2DP SBC media channel
pub const PAYLOAD_TYPE_SBC: u8 = 1;

/// Synchronization source written into every media packet
pub const DEFAULT_SSRC: u32 = 1;

/// Size of the RTP fixed header
pub const RTP_HEADER_LEN: usize = 12;

/// Size of the SBC payload descriptor
pub const PAYLOAD_HEADER_LEN: usize = 1;

/// Bytes in front of the first SBC frame
pub const MEDIA_HEADER_LEN: usize = RTP_HEADER_LEN + PAYLOAD_HEADER_LEN;

/// Largest value the 4-bit frame-count field can hold
pub const MAX_FRAMES_PER_PACKET: u8 = 0x0F;

/// RTP fixed header.
///
/// # Wire Format
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    // ---
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,

    /// Packet sequence number (wraps at 65535)
    pub sequence: u16,

    /// Cumulative sample count
    pub timestamp: u32,

    pub ssrc: u32,
}

impl RtpHeader {
    // ---
    /// Header for an SBC media packet: V=2, no padding, no extension,
    /// no CSRCs, marker clear, PT=1.
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        // ---
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: PAYLOAD_TYPE_SBC,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Packs the header into the first 12 bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8; RTP_HEADER_LEN]) {
        // ---
        // Byte 0: V(2) | P(1) | X(1) | CC(4)
        buf[0] = ((self.version & 0x03) << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc_count & 0x0F);

        // Byte 1: M(1) | PT(7)
        buf[1] = (u8::from(self.marker) << 7) | (self.payload_type & 0x7F);

        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
    }

    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LEN] {
        // ---
        let mut buf = [0u8; RTP_HEADER_LEN];
        self.write_to(&mut buf);
        buf
    }

    /// Parses the fixed header from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Packet is smaller than minimum header size (12 bytes)
    /// - RTP version is not 2
    pub fn parse(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < RTP_HEADER_LEN {
            anyhow::bail!("packet too small: {} bytes", data.len());
        }

        let version = (data[0] >> 6) & 0x03;
        if version != RTP_VERSION {
            anyhow::bail!("invalid RTP version: {}", version);
        }

        Ok(Self {
            version,
            padding: data[0] & 0x20 != 0,
            extension: data[0] & 0x10 != 0,
            csrc_count: data[0] & 0x0F,
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// SBC media payload descriptor.
///
/// ```text
///   7   6   5   4   3 2 1 0
/// +---+---+---+---+-------+
/// | F | S | L |RFA|frames |
/// +---+---+---+---+-------+
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadHeader {
    // ---
    pub fragmented: bool,
    pub first_fragment: bool,
    pub last_fragment: bool,
    pub frame_count: u8,
}

impl PayloadHeader {
    // ---
    /// Unfragmented descriptor for `frame_count` whole frames.
    pub fn frames(frame_count: u8) -> Self {
        // ---
        Self {
            frame_count,
            ..Self::default()
        }
    }

    pub fn to_byte(&self) -> u8 {
        // ---
        (u8::from(self.fragmented) << 7)
            | (u8::from(self.first_fragment) << 6)
            | (u8::from(self.last_fragment) << 5)
            | (self.frame_count & MAX_FRAMES_PER_PACKET)
    }

    pub fn from_byte(byte: u8) -> Self {
        // ---
        Self {
            fragmented: byte & 0x80 != 0,
            first_fragment: byte & 0x40 != 0,
            last_fragment: byte & 0x20 != 0,
            frame_count: byte & MAX_FRAMES_PER_PACKET,
        }
    }
}

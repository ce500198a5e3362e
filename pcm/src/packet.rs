//! In-flight AVDTP media packet.
//!
//! The packet buffer always starts with room for the RTP header and the
//! payload descriptor; encoded frames are appended behind them. Header
//! fields are written only when the packet is finalized for sending.

use bt_pcm_common::rtp::{
    PayloadHeader, RtpHeader, DEFAULT_SSRC, MAX_FRAMES_PER_PACKET, MEDIA_HEADER_LEN, RTP_HEADER_LEN,
};

/// One outgoing media packet plus the session's sequencing state.
#[derive(Debug)]
pub struct MediaPacket {
    // ---
    buf: Vec<u8>,
    used: usize,
    frame_count: u8,
    /// Audio frames carried by this packet
    samples: u32,
    /// Audio frames appended over the whole session
    total_samples: u32,
    sequence: u16,
    ssrc: u32,
}

impl MediaPacket {
    // ---
    /// Creates a header-only packet limited to `mtu` bytes.
    ///
    /// `mtu` must leave room for at least the media header.
    pub fn new(mtu: usize) -> Self {
        // ---
        debug_assert!(mtu > MEDIA_HEADER_LEN);
        Self {
            buf: vec![0; mtu],
            used: MEDIA_HEADER_LEN,
            frame_count: 0,
            samples: 0,
            total_samples: 0,
            sequence: 0,
            ssrc: DEFAULT_SSRC,
        }
    }

    pub fn mtu(&self) -> usize {
        // ---
        self.buf.len()
    }

    /// Bytes used, headers included.
    pub fn used(&self) -> usize {
        // ---
        self.used
    }

    pub fn frame_count(&self) -> u8 {
        // ---
        self.frame_count
    }

    pub fn samples(&self) -> u32 {
        // ---
        self.samples
    }

    pub fn total_samples(&self) -> u32 {
        // ---
        self.total_samples
    }

    /// Sequence number the next flushed packet carries.
    pub fn sequence(&self) -> u16 {
        // ---
        self.sequence
    }

    /// True while no frame has been appended since the last flush.
    pub fn is_empty(&self) -> bool {
        // ---
        self.frame_count == 0
    }

    /// Whether a frame of `len` bytes can be appended without a flush.
    pub fn fits(&self, len: usize) -> bool {
        // ---
        self.used + len <= self.buf.len()
    }

    /// The packet has reached the MTU or the frame-count field limit.
    pub fn is_full(&self) -> bool {
        // ---
        self.used == self.buf.len() || self.frame_count >= MAX_FRAMES_PER_PACKET
    }

    /// Appends one encoded frame covering `samples` audio frames.
    ///
    /// The caller flushes first when the frame does not fit.
    pub fn push_frame(&mut self, frame: &[u8], samples: u32) {
        // ---
        debug_assert!(self.fits(frame.len()));
        let end = self.used + frame.len();
        self.buf[self.used..end].copy_from_slice(frame);
        self.used = end;
        self.frame_count += 1;
        self.samples = self.samples.wrapping_add(samples);
        self.total_samples = self.total_samples.wrapping_add(samples);
    }

    /// Writes both headers and returns the bytes to send.
    pub fn finalize(&mut self) -> &[u8] {
        // ---
        let header = RtpHeader::new(self.sequence, self.total_samples, self.ssrc);
        let mut rtp = [0u8; RTP_HEADER_LEN];
        header.write_to(&mut rtp);
        self.buf[..RTP_HEADER_LEN].copy_from_slice(&rtp);
        self.buf[RTP_HEADER_LEN] = PayloadHeader::frames(self.frame_count).to_byte();

        &self.buf[..self.used]
    }

    /// Returns to header-only size and moves to the next sequence number.
    ///
    /// Called after every flush, whatever its outcome.
    pub fn advance(&mut self) {
        // ---
        self.used = MEDIA_HEADER_LEN;
        self.frame_count = 0;
        self.samples = 0;
        self.sequence = self.sequence.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_new_packet_is_header_only() {
        // ---
        let packet = MediaPacket::new(100);
        assert_eq!(packet.used(), MEDIA_HEADER_LEN);
        assert!(packet.is_empty());
        assert!(!packet.is_full());
        assert_eq!(packet.mtu(), 100);
    }

    #[test]
    fn test_finalize_writes_headers() {
        // ---
        let mut packet = MediaPacket::new(100);
        packet.push_frame(&[0x9C; 20], 128);
        packet.push_frame(&[0x9C; 20], 128);

        let bytes = packet.finalize().to_vec();
        assert_eq!(bytes.len(), MEDIA_HEADER_LEN + 40);

        let header = RtpHeader::parse(&bytes).expect("parse");
        assert_eq!(header.version, 2);
        assert_eq!(header.payload_type, 1);
        assert_eq!(header.sequence, 0);
        assert_eq!(header.timestamp, 256);
        assert_eq!(header.ssrc, DEFAULT_SSRC);
        assert_eq!(PayloadHeader::from_byte(bytes[RTP_HEADER_LEN]).frame_count, 2);
    }

    #[test]
    fn test_advance_resets_and_increments() {
        // ---
        let mut packet = MediaPacket::new(64);
        packet.push_frame(&[1; 10], 64);
        packet.advance();

        assert_eq!(packet.used(), MEDIA_HEADER_LEN);
        assert_eq!(packet.frame_count(), 0);
        assert_eq!(packet.samples(), 0);
        assert_eq!(packet.total_samples(), 64);
        assert_eq!(packet.sequence(), 1);
    }

    #[test]
    fn test_sequence_wraps() {
        // ---
        let mut packet = MediaPacket::new(64);
        for _ in 0..=u16::MAX {
            packet.advance();
        }
        assert_eq!(packet.sequence(), 0);
    }

    #[test]
    fn test_fits_and_full_at_mtu() {
        // ---
        let mut packet = MediaPacket::new(MEDIA_HEADER_LEN + 30);
        assert!(packet.fits(30));
        assert!(!packet.fits(31));

        packet.push_frame(&[0; 30], 1);
        assert!(packet.is_full());
    }

    #[test]
    fn test_full_at_frame_count_limit() {
        // ---
        let mut packet = MediaPacket::new(1000);
        for _ in 0..MAX_FRAMES_PER_PACKET {
            packet.push_frame(&[0; 2], 1);
        }
        assert!(packet.is_full());
    }
}

//! PCM accumulation buffers.
//!
//! Caller-supplied interleaved frames are gathered here until a whole codec
//! window (SBC path) or a whole transport packet (raw path) is available.
//! A full buffer is always drained by the same call that filled it, so
//! between calls `fill < capacity`.

/// Copies 16-bit samples from host byte order into big-endian wire order.
///
/// The encoder reads big-endian samples, so every sample goes through here
/// before it is encoded. Applying it twice restores the input. A trailing
/// odd byte is copied unchanged.
pub fn swap_to_wire(dst: &mut [u8], src: &[u8]) {
    // ---
    debug_assert_eq!(dst.len(), src.len());
    let mut dst_chunks = dst.chunks_exact_mut(2);
    let mut src_chunks = src.chunks_exact(2);
    for (d, s) in (&mut dst_chunks).zip(&mut src_chunks) {
        let sample = u16::from_ne_bytes([s[0], s[1]]);
        d.copy_from_slice(&sample.to_be_bytes());
    }
    dst_chunks
        .into_remainder()
        .copy_from_slice(src_chunks.remainder());
}

/// Fixed-capacity byte region plus a fill count.
#[derive(Debug)]
pub struct AccumulationBuffer {
    // ---
    buf: Vec<u8>,
    fill: usize,
}

impl AccumulationBuffer {
    // ---
    /// Creates a zeroed buffer holding `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        // ---
        Self {
            buf: vec![0; capacity],
            fill: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        // ---
        self.buf.len()
    }

    pub fn fill(&self) -> usize {
        // ---
        self.fill
    }

    pub fn is_full(&self) -> bool {
        // ---
        self.fill == self.buf.len()
    }

    /// How many of `offered` frames fit in the remaining space.
    pub fn frames_that_fit(&self, offered: usize, frame_size: usize) -> usize {
        // ---
        if frame_size == 0 {
            return 0;
        }
        offered.min((self.buf.len() - self.fill) / frame_size)
    }

    /// Appends `src` verbatim.
    pub fn push(&mut self, src: &[u8]) {
        // ---
        let end = self.fill + src.len();
        self.buf[self.fill..end].copy_from_slice(src);
        self.fill = end;
    }

    /// Appends `src` with every 16-bit sample moved to wire order.
    pub fn push_swapped(&mut self, src: &[u8]) {
        // ---
        let end = self.fill + src.len();
        swap_to_wire(&mut self.buf[self.fill..end], src);
        self.fill = end;
    }

    /// Filled part of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        // ---
        &self.buf[..self.fill]
    }

    /// Drops `n` bytes from the fill count.
    pub fn consume(&mut self, n: usize) {
        // ---
        self.fill = self.fill.saturating_sub(n);
    }

    /// Rolls the fill count back to an earlier value.
    pub fn truncate(&mut self, fill: usize) {
        // ---
        self.fill = self.fill.min(fill);
    }

    pub fn clear(&mut self) {
        // ---
        self.fill = 0;
    }

    /// Zeroes the contents and empties the buffer.
    pub fn reset(&mut self) {
        // ---
        self.buf.fill(0);
        self.fill = 0;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_swap_is_self_inverse() {
        // ---
        let mut rng = StdRng::seed_from_u64(7);
        let original: Vec<u8> = (0..512).map(|_| rng.gen()).collect();

        let mut wire = vec![0u8; original.len()];
        swap_to_wire(&mut wire, &original);
        let mut back = vec![0u8; original.len()];
        swap_to_wire(&mut back, &wire);

        assert_eq!(wire.len(), original.len());
        assert_eq!(back, original);
    }

    #[test]
    fn test_swap_produces_big_endian_samples() {
        // ---
        let samples: [i16; 3] = [1, -2, 0x1234];
        let host: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();

        let mut wire = vec![0u8; host.len()];
        swap_to_wire(&mut wire, &host);

        assert_eq!(wire, vec![0x00, 0x01, 0xFF, 0xFE, 0x12, 0x34]);
    }

    #[test]
    fn test_frames_that_fit() {
        // ---
        let mut buf = AccumulationBuffer::new(16);
        assert_eq!(buf.frames_that_fit(10, 4), 4);

        buf.push(&[1; 12]);
        assert_eq!(buf.frames_that_fit(10, 4), 1);
        assert_eq!(buf.frames_that_fit(0, 4), 0);
        assert_eq!(buf.frames_that_fit(3, 0), 0);
    }

    #[test]
    fn test_push_consume_and_truncate() {
        // ---
        let mut buf = AccumulationBuffer::new(8);
        buf.push(&[1, 2, 3, 4]);
        buf.push_swapped(&[5, 6, 7, 8]);

        assert!(buf.is_full());
        assert_eq!(&buf.as_slice()[..4], &[1, 2, 3, 4]);

        buf.truncate(4);
        assert_eq!(buf.fill(), 4);
        buf.consume(10);
        assert_eq!(buf.fill(), 0);
    }
}

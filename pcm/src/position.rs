//! Host-visible position counter.

/// Frame position modulo the host ring buffer size.
///
/// Moves forward only, and only for data that was confirmed encoded or
/// confirmed transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionCounter {
    // ---
    position: u64,
    ring_size: u64,
}

impl PositionCounter {
    // ---
    pub fn new(ring_size: u64) -> Self {
        // ---
        Self {
            position: 0,
            ring_size: ring_size.max(1),
        }
    }

    pub fn get(&self) -> u64 {
        // ---
        self.position
    }

    pub fn ring_size(&self) -> u64 {
        // ---
        self.ring_size
    }

    pub fn advance(&mut self, frames: u64) {
        // ---
        self.position = (self.position + frames % self.ring_size) % self.ring_size;
    }

    /// Puts the counter at `frames` (modulo the ring size).
    pub fn reset_to(&mut self, frames: u64) {
        // ---
        self.position = frames % self.ring_size;
    }
}

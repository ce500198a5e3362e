//! Raw passthrough path.
//!
//! Uncompressed fixed-length packets: playback fills one packet-length
//! buffer and sends it whole, capture receives whole packets and hands
//! them out across as many calls as the host needs.

use tracing::debug;

use crate::accumulate::AccumulationBuffer;
use crate::config::IoMode;
use crate::error::{Error, Result};
use crate::stats::Telemetry;
use crate::transport::DataTransport;

/// Result of one transfer call on the raw path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTransfer {
    // ---
    /// Caller frames consumed or produced
    pub frames: usize,

    /// A packet crossed the transport during this call
    pub packet_done: bool,
}

/// Playback side: accumulate, then send one whole packet.
#[derive(Debug)]
pub(crate) struct RawWriter {
    // ---
    buf: AccumulationBuffer,
}

impl RawWriter {
    // ---
    pub(crate) fn new(packet_len: usize) -> Self {
        // ---
        Self {
            buf: AccumulationBuffer::new(packet_len),
        }
    }

    pub(crate) fn fill(&self) -> usize {
        // ---
        self.buf.fill()
    }

    pub(crate) fn clear(&mut self) {
        // ---
        self.buf.clear();
    }

    /// Takes as many whole frames from `pcm` as fit in the packet.
    ///
    /// When the packet fills up it is sent in the same call. A failed or
    /// short send rolls the buffer back to where it was before this call,
    /// so the host can offer the same frames again.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the send fails or is short.
    pub(crate) fn write<T>(
        &mut self,
        pcm: &[u8],
        frame_size: usize,
        transport: &mut T,
        mode: IoMode,
        telemetry: &mut Telemetry,
    ) -> Result<RawTransfer>
    where
        T: DataTransport + ?Sized,
    {
        // ---
        let before = self.buf.fill();
        let frames = self.buf.frames_that_fit(pcm.len() / frame_size, frame_size);
        self.buf.push(&pcm[..frames * frame_size]);

        if !self.buf.is_full() {
            return Ok(RawTransfer {
                frames,
                packet_done: false,
            });
        }

        let expected = self.buf.capacity();
        match transport.send(self.buf.as_slice(), mode) {
            Ok(n) if n == expected => {
                self.buf.clear();
                telemetry.raw_sent();
                debug!("sent raw packet of {n} bytes");
                Ok(RawTransfer {
                    frames,
                    packet_done: true,
                })
            }
            Ok(n) => {
                self.buf.truncate(before);
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short send: {n} of {expected} bytes"),
                )))
            }
            Err(e) => {
                self.buf.truncate(before);
                Err(Error::Io(e))
            }
        }
    }
}

/// Capture side: receive one whole packet, then copy it out piecewise.
#[derive(Debug)]
pub(crate) struct RawReader {
    // ---
    buf: Vec<u8>,
    /// Bytes of the current packet already copied out
    offset: usize,
    /// A received packet still has frames to hand out
    pending: bool,
}

impl RawReader {
    // ---
    pub(crate) fn new(packet_len: usize) -> Self {
        // ---
        Self {
            buf: vec![0; packet_len],
            offset: 0,
            pending: false,
        }
    }

    pub(crate) fn clear(&mut self) {
        // ---
        self.offset = 0;
        self.pending = false;
    }

    /// Copies whole frames of the current packet into `out`.
    ///
    /// A new packet is received first when nothing is pending. A packet
    /// stays pending until all of its frames have been handed out, even
    /// when `out` is too small to take one.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the receive fails or returns fewer bytes
    /// than one packet. Nothing is retried here.
    pub(crate) fn read<T>(
        &mut self,
        out: &mut [u8],
        frame_size: usize,
        transport: &mut T,
        mode: IoMode,
        telemetry: &mut Telemetry,
    ) -> Result<RawTransfer>
    where
        T: DataTransport + ?Sized,
    {
        // ---
        let packet_len = self.buf.len();
        let mut packet_done = false;

        if !self.pending {
            let n = transport.recv(&mut self.buf, mode)?;
            if n != packet_len {
                return Err(Error::short_read(n, packet_len));
            }
            telemetry.raw_received();
            self.offset = 0;
            self.pending = true;
            packet_done = true;
        }

        let frames = (out.len() / frame_size).min((packet_len - self.offset) / frame_size);
        let len = frames * frame_size;
        out[..len].copy_from_slice(&self.buf[self.offset..self.offset + len]);
        self.offset += len;
        if packet_len - self.offset < frame_size {
            self.pending = false;
        }

        Ok(RawTransfer {
            frames,
            packet_done,
        })
    }
}

//! Encode path: accumulate, byte-swap, SBC-encode, packetize, flush.
//!
//! PCM is gathered one codec window at a time. A full window is encoded
//! and the frame appended to the in-flight media packet, flushing first
//! when it would not fit and again when the packet fills up exactly.
//!
//! Losses on this path are counted rather than returned: a rejected
//! encode drops its window, and a flush that fails or runs out of
//! attempts drops (part of) its packet. Only a peer that has gone away
//! is reported to the caller.

use std::io;
use std::time::Instant;

use tracing::warn;

use crate::accumulate::AccumulationBuffer;
use crate::codec::FrameEncoder;
use crate::config::IoMode;
use crate::error::{Error, Result};
use crate::packet::MediaPacket;
use crate::sender::{FlushOutcome, TransportSender};
use crate::stats::Telemetry;
use crate::transport::DataTransport;

/// Result of one transfer call on the encode path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeTransfer {
    // ---
    /// Caller frames consumed
    pub frames: usize,

    /// Frames confirmed encoded during this call
    pub encoded: usize,
}

/// A flush found the peer gone after this call's frames were encoded.
#[derive(Debug)]
pub(crate) struct PeerGone {
    // ---
    /// What the call consumed and encoded before the flush failed
    pub(crate) transfer: EncodeTransfer,

    pub(crate) error: Error,
}

fn is_disconnect(err: &Error) -> bool {
    // ---
    matches!(
        err,
        Error::Io(e) if matches!(
            e.kind(),
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
        )
    )
}

pub(crate) struct EncodePath<E> {
    // ---
    pcm: AccumulationBuffer,
    encoder: E,
    frame: Vec<u8>,
    packet: MediaPacket,
    sender: TransportSender,
}

impl<E: FrameEncoder> EncodePath<E> {
    // ---
    pub(crate) fn new(encoder: E, mtu: usize, sender: TransportSender) -> Self {
        // ---
        Self {
            pcm: AccumulationBuffer::new(encoder.codesize()),
            frame: Vec::with_capacity(encoder.frame_length()),
            encoder,
            packet: MediaPacket::new(mtu),
            sender,
        }
    }

    pub(crate) fn codesize(&self) -> usize {
        // ---
        self.pcm.capacity()
    }

    pub(crate) fn fill(&self) -> usize {
        // ---
        self.pcm.fill()
    }

    pub(crate) fn packet(&self) -> &MediaPacket {
        // ---
        &self.packet
    }

    /// Drops buffered PCM; the packet and its sequence state survive.
    pub(crate) fn clear(&mut self) {
        // ---
        self.pcm.clear();
    }

    /// Consumes whole frames from `pcm`, encoding when a window fills.
    ///
    /// # Arguments
    ///
    /// * `pcm` - Interleaved host-order frames
    /// * `frame_size` - Bytes per interleaved frame
    /// * `transport` - Data socket for flushes
    /// * `mode` - Per-call blocking mode
    /// * `telemetry` - Counters for encode and flush outcomes
    ///
    /// # Errors
    ///
    /// Returns [`PeerGone`] only when a flush finds the peer gone. The
    /// frames of this call have been consumed and encoded by then, and
    /// the error carries their counts.
    pub(crate) fn write<T>(
        &mut self,
        pcm: &[u8],
        frame_size: usize,
        transport: &mut T,
        mode: IoMode,
        telemetry: &mut Telemetry,
    ) -> std::result::Result<EncodeTransfer, PeerGone>
    where
        T: DataTransport + ?Sized,
    {
        // ---
        let frames = self.pcm.frames_that_fit(pcm.len() / frame_size, frame_size);
        self.pcm.push_swapped(&pcm[..frames * frame_size]);

        if !self.pcm.is_full() {
            return Ok(EncodeTransfer { frames, encoded: 0 });
        }

        let started = Instant::now();
        let encoded = match self.encoder.encode(self.pcm.as_slice(), &mut self.frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                telemetry.encode_error();
                warn!("dropping {} bytes of PCM: {e}", self.pcm.fill());
                self.pcm.clear();
                return Ok(EncodeTransfer { frames, encoded: 0 });
            }
        };
        telemetry.frame_encoded(Some(started.elapsed().as_secs_f64()));
        self.pcm.consume(encoded.consumed);

        let mut disconnected = None;
        if !self.packet.fits(encoded.len) {
            if let Err(e) = self.flush(transport, mode, telemetry) {
                disconnected = Some(e);
            }
        }

        let samples = encoded.consumed / frame_size;
        self.packet
            .push_frame(&self.frame[..encoded.len], samples as u32);

        if self.packet.is_full() {
            if let Err(e) = self.flush(transport, mode, telemetry) {
                disconnected = disconnected.or(Some(e));
            }
        }

        let transfer = EncodeTransfer {
            frames,
            encoded: samples,
        };
        match disconnected {
            Some(error) => Err(PeerGone { transfer, error }),
            None => Ok(transfer),
        }
    }

    /// Flushes a partly filled packet, if there is one.
    ///
    /// # Errors
    ///
    /// Returns any flush error as is.
    pub(crate) fn drain<T>(
        &mut self,
        transport: &mut T,
        mode: IoMode,
        telemetry: &mut Telemetry,
    ) -> Result<Option<FlushOutcome>>
    where
        T: DataTransport + ?Sized,
    {
        // ---
        if self.packet.is_empty() {
            return Ok(None);
        }
        self.sender
            .flush(&mut self.packet, transport, mode, telemetry)
            .map(Some)
    }

    /// Flushes the current packet, keeping only peer-gone errors.
    fn flush<T>(&mut self, transport: &mut T, mode: IoMode, telemetry: &mut Telemetry) -> Result<()>
    where
        T: DataTransport + ?Sized,
    {
        // ---
        match self.sender.flush(&mut self.packet, transport, mode, telemetry) {
            Err(e) if is_disconnect(&e) => Err(e),
            _ => Ok(()),
        }
    }
}

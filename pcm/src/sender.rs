//! Media packet flush with bounded retry.
//!
//! A flush hands the finalized packet to the transport. Short sends are
//! retried from the first unsent byte, up to a fixed number of attempts
//! with a fixed pause between them. Whatever the outcome, the packet is
//! reset to header-only size and its sequence number advances, so a flush
//! that runs out of attempts drops the unsent tail. That loss is reported
//! as [`FlushOutcome::Truncated`] and counted, never hidden.

use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{IoMode, PipelineConfig};
use crate::error::{Error, Result};
use crate::packet::MediaPacket;
use crate::stats::Telemetry;
use crate::transport::DataTransport;

/// Attempt bound and pause for short sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    // ---
    /// Total send attempts per packet (at least one)
    pub max_attempts: u32,

    /// Pause after a short send when another attempt remains
    pub interval: Duration,
}

impl RetryPolicy {
    // ---
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        // ---
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        // ---
        Self::new(config.flush_attempts, config.retry_interval)
    }
}

/// How a flush ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every byte of the packet was accepted.
    Complete { bytes: usize, attempts: u32 },

    /// Attempts ran out with `expected - sent` bytes never sent.
    Truncated {
        sent: usize,
        expected: usize,
        attempts: u32,
    },
}

impl FlushOutcome {
    // ---
    pub fn is_complete(&self) -> bool {
        // ---
        matches!(self, FlushOutcome::Complete { .. })
    }

    /// Bytes the transport accepted.
    pub fn bytes_sent(&self) -> usize {
        // ---
        match *self {
            FlushOutcome::Complete { bytes, .. } => bytes,
            FlushOutcome::Truncated { sent, .. } => sent,
        }
    }

    pub fn attempts(&self) -> u32 {
        // ---
        match *self {
            FlushOutcome::Complete { attempts, .. } | FlushOutcome::Truncated { attempts, .. } => {
                attempts
            }
        }
    }
}

/// Sends media packets and keeps their bookkeeping straight.
#[derive(Debug, Clone)]
pub struct TransportSender {
    // ---
    policy: RetryPolicy,
}

impl TransportSender {
    // ---
    pub fn new(policy: RetryPolicy) -> Self {
        // ---
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        // ---
        &self.policy
    }

    /// Flushes `packet` and resets it for the next frames.
    ///
    /// # Arguments
    ///
    /// * `packet` - Packet to finalize and send
    /// * `transport` - Data socket
    /// * `mode` - Per-call blocking mode
    /// * `telemetry` - Counters updated with the outcome
    ///
    /// # Returns
    ///
    /// `Complete` or `Truncated`; in both cases the packet has been reset
    /// and its sequence number incremented.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the transport reports an error, accepts
    /// zero bytes, or would block in non-blocking mode. The packet is
    /// reset in these cases too and its contents are lost.
    pub(crate) fn flush<T>(
        &self,
        packet: &mut MediaPacket,
        transport: &mut T,
        mode: IoMode,
        telemetry: &mut Telemetry,
    ) -> Result<FlushOutcome>
    where
        T: DataTransport + ?Sized,
    {
        // ---
        let sequence = packet.sequence();
        let frames = packet.frame_count();
        let result = self.send_with_retry(packet.finalize(), transport, mode, telemetry);
        packet.advance();

        match &result {
            Ok(outcome @ FlushOutcome::Complete { .. }) => {
                telemetry.packet_sent(outcome.bytes_sent());
                debug!(
                    "flushed packet seq={sequence} frames={frames} bytes={} attempts={}",
                    outcome.bytes_sent(),
                    outcome.attempts()
                );
            }
            Ok(FlushOutcome::Truncated {
                sent,
                expected,
                attempts,
            }) => {
                telemetry.packet_sent(*sent);
                telemetry.truncated();
                warn!(
                    "packet seq={sequence} truncated: sent {sent} of {expected} bytes after {attempts} attempts"
                );
            }
            Err(e) => {
                telemetry.failed();
                warn!("packet seq={sequence} dropped: {e}");
            }
        }
        result
    }

    fn send_with_retry<T>(
        &self,
        bytes: &[u8],
        transport: &mut T,
        mode: IoMode,
        telemetry: &mut Telemetry,
    ) -> Result<FlushOutcome>
    where
        T: DataTransport + ?Sized,
    {
        // ---
        let expected = bytes.len();
        let mut sent = 0;
        let mut attempts = 0;

        while attempts < self.policy.max_attempts {
            attempts += 1;
            match transport.send(&bytes[sent..], mode) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted zero bytes",
                    )));
                }
                Ok(n) => {
                    sent += n.min(expected - sent);
                    if sent == expected {
                        return Ok(FlushOutcome::Complete {
                            bytes: sent,
                            attempts,
                        });
                    }
                    debug!("short send: {sent} of {expected} bytes (attempt {attempts})");
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && !mode.is_nonblocking() => {
                    // Send timeout on a blocking socket.
                    debug!("send timed out (attempt {attempts})");
                }
                Err(e) => return Err(Error::Io(e)),
            }

            if attempts < self.policy.max_attempts {
                telemetry.retry();
                thread::sleep(self.policy.interval);
            }
        }

        Ok(FlushOutcome::Truncated {
            sent,
            expected,
            attempts,
        })
    }
}

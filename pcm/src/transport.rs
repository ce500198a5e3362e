//! Data transport handle.
//!
//! After the handshake the pipeline only needs "send these bytes" and
//! "receive up to this many bytes" on the descriptor the daemon handed
//! over. [`DataTransport`] is that seam; [`SocketTransport`] is the real
//! socket, and tests substitute scripted doubles.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use socket2::SockRef;
use tracing::{debug, warn};

use crate::config::{Direction, IoMode};

/// Bluetooth SCO socket level.
const SOL_SCO: libc::c_int = 17;
const SCO_TXBUFS: libc::c_int = 0x03;
const SCO_RXBUFS: libc::c_int = 0x04;

/// Socket tuning applied when the host declares its buffer geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketTuning {
    /// Raw transport: kernel buffer count for one direction.
    BufferCount { direction: Direction, count: u32 },
    /// Encoded transport: send or receive timeout.
    Timeout {
        direction: Direction,
        timeout: Duration,
    },
}

/// Byte transport the pipeline sends packets over.
pub trait DataTransport {
    // ---
    /// Sends `buf` in one call, returning the bytes accepted.
    ///
    /// In [`IoMode::NonBlocking`] a full socket yields
    /// `io::ErrorKind::WouldBlock` instead of suspending.
    fn send(&mut self, buf: &[u8], mode: IoMode) -> io::Result<usize>;

    /// Receives up to `buf.len()` bytes, waiting for all of them when
    /// blocking.
    fn recv(&mut self, buf: &mut [u8], mode: IoMode) -> io::Result<usize>;

    /// Descriptor the host may poll, if any.
    fn raw_fd(&self) -> Option<RawFd> {
        // ---
        None
    }

    /// Applies socket options derived from the host buffer geometry.
    fn tune(&mut self, tuning: SocketTuning) -> io::Result<()> {
        // ---
        let _ = tuning;
        Ok(())
    }
}

fn io_flags(mode: IoMode) -> libc::c_int {
    // ---
    if mode.is_nonblocking() {
        libc::MSG_DONTWAIT
    } else {
        0
    }
}

/// The data socket received from the audio daemon.
#[derive(Debug)]
pub struct SocketTransport {
    // ---
    fd: OwnedFd,
}

impl SocketTransport {
    // ---
    pub fn new(fd: OwnedFd) -> Self {
        // ---
        Self { fd }
    }

    /// Discards everything already queued on the socket.
    ///
    /// The daemon may have buffered audio before this side was ready.
    /// Reads are non-blocking and stop at the first empty or failed read.
    /// `scratch` is zeroed afterwards. Returns the bytes discarded.
    pub fn drain(&self, scratch: &mut [u8]) -> usize {
        // ---
        let mut discarded = 0;
        if scratch.is_empty() {
            return discarded;
        }

        loop {
            let ret = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    scratch.as_mut_ptr().cast(),
                    scratch.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if ret <= 0 {
                break;
            }
            discarded += ret as usize;
        }
        scratch.fill(0);

        if discarded > 0 {
            debug!("drained {discarded} stale bytes from data socket");
        }
        discarded
    }

    fn set_sco_buffers(&self, direction: Direction, count: u32) -> io::Result<()> {
        // ---
        let opt = match direction {
            Direction::Playback => SCO_TXBUFS,
            Direction::Capture => SCO_RXBUFS,
        };
        let value = libc::c_int::try_from(count)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "buffer count too large"))?;

        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_SCO,
                opt,
                &value as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsFd for SocketTransport {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        // ---
        self.fd.as_fd()
    }
}

impl DataTransport for SocketTransport {
    fn send(&mut self, buf: &[u8], mode: IoMode) -> io::Result<usize> {
        // ---
        let ret = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                io_flags(mode) | libc::MSG_NOSIGNAL,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn recv(&mut self, buf: &mut [u8], mode: IoMode) -> io::Result<usize> {
        // ---
        let ret = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                io_flags(mode) | libc::MSG_WAITALL,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        // ---
        Some(self.fd.as_raw_fd())
    }

    fn tune(&mut self, tuning: SocketTuning) -> io::Result<()> {
        // ---
        let sock = SockRef::from(&self.fd);
        match tuning {
            SocketTuning::BufferCount { direction, count } => {
                if let Err(e) = self.set_sco_buffers(direction, count) {
                    // Not an SCO socket; fall back to plain buffer sizes.
                    debug!("SCO buffer option unavailable ({e}), using socket buffer size");
                    let size = count as usize;
                    match direction {
                        Direction::Playback => sock.set_send_buffer_size(size)?,
                        Direction::Capture => sock.set_recv_buffer_size(size)?,
                    }
                }
            }
            SocketTuning::Timeout { direction, timeout } => {
                let result = match direction {
                    Direction::Playback => sock.set_write_timeout(Some(timeout)),
                    Direction::Capture => sock.set_read_timeout(Some(timeout)),
                };
                if let Err(e) = result {
                    warn!("failed to set data socket timeout: {e}");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::os::unix::net::UnixDatagram;

    fn pair() -> (SocketTransport, UnixDatagram) {
        // ---
        let (ours, theirs) = UnixDatagram::pair().expect("socket pair");
        (SocketTransport::new(OwnedFd::from(ours)), theirs)
    }

    #[test]
    fn test_send_and_recv() {
        // ---
        let (mut transport, peer) = pair();

        let sent = transport.send(b"media", IoMode::Blocking).expect("send");
        assert_eq!(sent, 5);

        let mut buf = [0u8; 16];
        let n = peer.recv(&mut buf).expect("peer recv");
        assert_eq!(&buf[..n], b"media");

        peer.send(b"back").expect("peer send");
        let n = transport.recv(&mut buf[..4], IoMode::Blocking).expect("recv");
        assert_eq!(&buf[..n], b"back");
    }

    #[test]
    fn test_nonblocking_recv_would_block() {
        // ---
        let (mut transport, _peer) = pair();
        let mut buf = [0u8; 8];

        let err = transport.recv(&mut buf, IoMode::NonBlocking).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_drain_discards_queued_data() {
        // ---
        let (transport, peer) = pair();
        peer.send(&[7u8; 32]).expect("queue");
        peer.send(&[7u8; 32]).expect("queue");

        let mut scratch = [0xAAu8; 64];
        let discarded = transport.drain(&mut scratch);

        assert_eq!(discarded, 64);
        assert!(scratch.iter().all(|&b| b == 0));
        assert_eq!(transport.drain(&mut scratch), 0);
    }

    #[test]
    fn test_buffer_count_falls_back_on_non_sco_socket() {
        // ---
        let (mut transport, _peer) = pair();
        transport
            .tune(SocketTuning::BufferCount {
                direction: Direction::Playback,
                count: 4,
            })
            .expect("fallback to SO_SNDBUF");
        assert!(transport.raw_fd().is_some());
    }
}

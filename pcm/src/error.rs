//! Error types for the PCM bridge.

use std::io;

use bt_pcm_common::IpcError;
use thiserror::Error;

/// Pipeline error.
///
/// Negotiation failures ([`Error::Protocol`], [`Error::Rejected`]) mean the
/// session is unusable and the caller should reconnect; [`Error::Io`] on a
/// transfer is an audio glitch the caller may simply propagate.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unexpected control-channel response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with a non-success status.
    #[error("audio daemon rejected configuration: error code {code}")]
    Rejected { code: u8 },

    /// Socket send/receive failure, short reads and zero-byte sends.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The codec refused a full input window.
    #[error("encode error: {0}")]
    Encode(String),

    /// Negotiated or host parameters that cannot be served.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    // ---
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        // ---
        Error::Protocol(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        // ---
        Error::Config(msg.into())
    }

    pub(crate) fn short_read(got: usize, expected: usize) -> Self {
        // ---
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read: {got} of {expected} bytes"),
        ))
    }

    /// Session negotiation failed; reconnecting is the only way forward.
    pub fn is_protocol(&self) -> bool {
        // ---
        matches!(self, Error::Protocol(_) | Error::Rejected { .. })
    }

    /// Transport-level failure of a single transfer.
    pub fn is_transient(&self) -> bool {
        // ---
        matches!(self, Error::Io(_))
    }

    /// A non-blocking call found the socket not ready.
    pub fn is_would_block(&self) -> bool {
        // ---
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

impl From<IpcError> for Error {
    fn from(err: IpcError) -> Self {
        // ---
        Error::Protocol(err.to_string())
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

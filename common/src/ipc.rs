//! Audio daemon control-channel records.
//!
//! The daemon speaks a tiny fixed-layout protocol on a local stream socket.
//! Every packet starts with a 4-byte header whose `length` field counts the
//! payload bytes that follow it. A configuration response carries a
//! [`DataConfig`] record and, when the stream is SBC encoded, a trailing
//! [`SbcRecord`].
//!
//! # Wire Format
//!
//! ```text
//! header:     type u8 | role u8 | error u8 | length u8
//! DataConfig: codec u8 | channels u8 | rate u16le | sample_size u8
//!             | pkt_len u16le | fd_opt u8 | channel_mode u8
//! SbcRecord:  allocation u8 | subbands u8 | blocks u8 | bitpool u8
//! ```
//!
//! Multi-byte fields are little-endian. The data-transport descriptor is not
//! part of any record: it travels as `SCM_RIGHTS` ancillary data attached to a
//! second, header-only response packet.

use thiserror::Error;

/// Name of the daemon socket in the Linux abstract namespace.
pub const SOCKET_NAME: &str = "/org/bluez/audio";

/// Packet type codes.
pub mod packet_type {
    pub const CFG_REQ: u8 = 0;
    pub const CFG_RSP: u8 = 1;
    pub const STATE_REQ: u8 = 2;
    pub const STATE_RSP: u8 = 3;
}

/// Audio roles a client may ask for.
pub mod role {
    pub const NONE: u8 = 0;
    pub const AUTO: u8 = 1;
    pub const VOICE: u8 = 2;
    pub const HIFI: u8 = 3;
}

/// Status carried in the header `error` field.
pub const ERROR_NONE: u8 = 0;

/// Codec identifiers.
pub mod codec {
    pub const NONE: u8 = 0;
    pub const SBC: u8 = 1;
}

/// Channel mode flags.
pub mod channel_mode {
    pub const MONO: u8 = 1 << 3;
    pub const DUAL_CHANNEL: u8 = 1 << 2;
    pub const STEREO: u8 = 1 << 1;
    pub const JOINT_STEREO: u8 = 1;
}

/// SBC allocation method flags.
pub mod allocation {
    pub const SNR: u8 = 1 << 1;
    pub const LOUDNESS: u8 = 1;
}

/// Direction the data descriptor was opened for.
pub mod fd_opt {
    pub const READ: u8 = 0;
    pub const WRITE: u8 = 1;
    pub const READ_WRITE: u8 = 2;
}

/// Errors raised while decoding control-channel records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// Fewer bytes than the record needs.
    #[error("truncated {what}: need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },
}

fn need(what: &'static str, data: &[u8], len: usize) -> Result<(), IpcError> {
    // ---
    if data.len() < len {
        return Err(IpcError::Truncated {
            what,
            need: len,
            got: data.len(),
        });
    }
    Ok(())
}

/// Common packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHeader {
    // ---
    pub packet_type: u8,
    pub role: u8,
    pub error: u8,
    /// Payload bytes following the header
    pub length: u8,
}

impl IpcHeader {
    // ---
    pub const LEN: usize = 4;

    /// Header-only configuration request.
    pub fn config_request() -> Self {
        // ---
        Self {
            packet_type: packet_type::CFG_REQ,
            role: role::NONE,
            error: ERROR_NONE,
            length: 0,
        }
    }

    /// Response header announcing `length` payload bytes.
    pub fn config_response(error: u8, length: u8) -> Self {
        // ---
        Self {
            packet_type: packet_type::CFG_RSP,
            role: role::NONE,
            error,
            length,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        // ---
        [self.packet_type, self.role, self.error, self.length]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, IpcError> {
        // ---
        need("packet header", data, Self::LEN)?;
        Ok(Self {
            packet_type: data[0],
            role: data[1],
            error: data[2],
            length: data[3],
        })
    }
}

/// Base stream configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataConfig {
    // ---
    pub codec: u8,
    pub channels: u8,
    pub rate: u16,
    /// Bytes per sample
    pub sample_size: u8,
    /// Transport packet length (raw) or MTU (SBC)
    pub pkt_len: u16,
    pub fd_opt: u8,
    pub channel_mode: u8,
}

impl DataConfig {
    // ---
    pub const LEN: usize = 9;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        // ---
        let rate = self.rate.to_le_bytes();
        let pkt_len = self.pkt_len.to_le_bytes();
        [
            self.codec,
            self.channels,
            rate[0],
            rate[1],
            self.sample_size,
            pkt_len[0],
            pkt_len[1],
            self.fd_opt,
            self.channel_mode,
        ]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, IpcError> {
        // ---
        need("data config", data, Self::LEN)?;
        Ok(Self {
            codec: data[0],
            channels: data[1],
            rate: u16::from_le_bytes([data[2], data[3]]),
            sample_size: data[4],
            pkt_len: u16::from_le_bytes([data[5], data[6]]),
            fd_opt: data[7],
            channel_mode: data[8],
        })
    }
}

/// SBC codec parameter extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcRecord {
    // ---
    pub allocation: u8,
    pub subbands: u8,
    pub blocks: u8,
    pub bitpool: u8,
}

impl SbcRecord {
    // ---
    pub const LEN: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        // ---
        [self.allocation, self.subbands, self.blocks, self.bitpool]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, IpcError> {
        // ---
        need("SBC record", data, Self::LEN)?;
        Ok(Self {
            allocation: data[0],
            subbands: data[1],
            blocks: data[2],
            bitpool: data[3],
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_config_request_is_header_only() {
        // ---
        let bytes = IpcHeader::config_request().to_bytes();
        assert_eq!(bytes, [packet_type::CFG_REQ, role::NONE, ERROR_NONE, 0]);
    }

    #[test]
    fn test_data_config_layout() {
        // ---
        let cfg = DataConfig {
            codec: codec::SBC,
            channels: 2,
            rate: 44100,
            sample_size: 2,
            pkt_len: 672,
            fd_opt: fd_opt::WRITE,
            channel_mode: channel_mode::JOINT_STEREO,
        };
        let bytes = cfg.to_bytes();

        assert_eq!(bytes[0], codec::SBC);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 44100);
        assert_eq!(u16::from_le_bytes([bytes[5], bytes[6]]), 672);
        assert_eq!(DataConfig::from_bytes(&bytes), Ok(cfg));
    }

    #[test]
    fn test_truncated_records_are_rejected() {
        // ---
        assert_eq!(
            IpcHeader::from_bytes(&[1, 0]),
            Err(IpcError::Truncated {
                what: "packet header",
                need: 4,
                got: 2
            })
        );
        assert!(DataConfig::from_bytes(&[0; 8]).is_err());
        assert!(SbcRecord::from_bytes(&[]).is_err());
    }
}

//! Session and pipeline configuration.
//!
//! [`SessionConfig`] is what the audio daemon negotiated; it is built once
//! from the handshake records and never changes afterwards. [`PipelineConfig`]
//! holds the local knobs (where the daemon lives, how hard to retry sends),
//! and [`HwParams`] is what the host audio framework declared.

use std::path::PathBuf;
use std::time::Duration;

use bt_pcm_common::ipc::{self, DataConfig, SbcRecord};

use crate::error::{Error, Result};
use crate::sbc::{Allocation, ChannelMode, SamplingFrequency, SbcParams};

/// Default bound on send attempts per media packet.
pub const DEFAULT_FLUSH_ATTEMPTS: u32 = 10;

/// Default pause between two send attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(150);

/// Stream direction as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Playback,
    Capture,
}

/// Per-call blocking mode supplied by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IoMode {
    #[default]
    Blocking,
    NonBlocking,
}

impl IoMode {
    // ---
    pub fn is_nonblocking(self) -> bool {
        // ---
        self == IoMode::NonBlocking
    }
}

/// Negotiated codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Fixed-length uncompressed packets (SCO).
    Raw,
    /// SBC frames in AVDTP media packets (A2DP).
    Sbc(SbcParams),
}

/// Parameters negotiated with the audio daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    // ---
    pub codec: Codec,
    pub channels: u8,
    pub rate: u32,
    /// Bytes per sample
    pub sample_size: u8,
    /// Raw packet length, or the media MTU for SBC
    pub packet_len: usize,
    /// Direction the daemon opened the data descriptor for
    pub fd_opt: u8,
}

impl SessionConfig {
    // ---
    /// Builds the session configuration from the handshake records.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if:
    /// - The packet length or channel count is zero
    /// - The codec identifier is unknown
    /// - The SBC record is missing for an SBC stream
    /// - The SBC parameters cannot drive the encoder
    pub fn from_records(data: &DataConfig, sbc: Option<&SbcRecord>) -> Result<Self> {
        // ---
        if data.pkt_len == 0 {
            return Err(Error::config("negotiated packet length is zero"));
        }
        if data.channels == 0 {
            return Err(Error::config("negotiated channel count is zero"));
        }

        let codec = match data.codec {
            ipc::codec::NONE => Codec::Raw,
            ipc::codec::SBC => {
                let record = sbc.ok_or_else(|| Error::config("SBC stream without codec record"))?;
                Codec::Sbc(sbc_params(data, record)?)
            }
            other => return Err(Error::config(format!("unsupported codec {other}"))),
        };

        Ok(Self {
            codec,
            channels: data.channels,
            rate: u32::from(data.rate),
            sample_size: data.sample_size,
            packet_len: usize::from(data.pkt_len),
            fd_opt: data.fd_opt,
        })
    }

    pub fn is_sbc(&self) -> bool {
        // ---
        matches!(self.codec, Codec::Sbc(_))
    }
}

fn sbc_params(data: &DataConfig, record: &SbcRecord) -> Result<SbcParams> {
    // ---
    let frequency = SamplingFrequency::from_hz(u32::from(data.rate))
        .ok_or_else(|| Error::config(format!("SBC cannot run at {} Hz", data.rate)))?;

    let channel_mode = match data.channels {
        1 => ChannelMode::Mono,
        2 => match data.channel_mode {
            ipc::channel_mode::DUAL_CHANNEL => ChannelMode::DualChannel,
            ipc::channel_mode::STEREO => ChannelMode::Stereo,
            // A mono flag on a two-channel stream is encoded joint, like joint itself.
            _ => ChannelMode::JointStereo,
        },
        n => return Err(Error::config(format!("SBC supports 1 or 2 channels, got {n}"))),
    };

    let allocation = if record.allocation == ipc::allocation::SNR {
        Allocation::Snr
    } else {
        Allocation::Loudness
    };

    SbcParams::new(
        frequency,
        channel_mode,
        record.blocks,
        record.subbands,
        allocation,
        record.bitpool,
    )
}

/// Where the audio daemon's control socket lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAddress {
    /// Name in the Linux abstract socket namespace.
    Abstract(String),
    /// Filesystem socket path.
    Path(PathBuf),
}

impl Default for ControlAddress {
    fn default() -> Self {
        // ---
        ControlAddress::Abstract(ipc::SOCKET_NAME.to_string())
    }
}

/// Local pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // ---
    /// Audio daemon control socket
    pub control_address: ControlAddress,

    /// Total send attempts per media packet
    pub flush_attempts: u32,

    /// Pause between attempts after a short send
    pub retry_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // ---
        Self {
            control_address: ControlAddress::default(),
            flush_attempts: DEFAULT_FLUSH_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Parameters declared by the host audio framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    // ---
    /// Bytes per interleaved frame (all channels)
    pub frame_size: usize,

    /// Ring buffer size in frames
    pub buffer_size: u64,

    /// Period size in frames
    pub period_size: u64,
}

impl HwParams {
    // ---
    pub fn new(frame_size: usize, buffer_size: u64, period_size: u64) -> Self {
        // ---
        Self {
            frame_size,
            buffer_size,
            period_size,
        }
    }

    /// Number of periods in the ring buffer.
    pub fn period_count(&self) -> u64 {
        // ---
        if self.period_size == 0 {
            0
        } else {
            self.buffer_size / self.period_size
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        // ---
        if self.frame_size == 0 {
            return Err(Error::config("frame size is zero"));
        }
        if self.buffer_size == 0 || self.period_size == 0 {
            return Err(Error::config("ring buffer and period size must be non-zero"));
        }
        if self.period_size > self.buffer_size {
            return Err(Error::config(format!(
                "period of {} frames exceeds ring buffer of {} frames",
                self.period_size, self.buffer_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bt_pcm_common::ipc::{allocation, channel_mode, codec, fd_opt};

    fn data_config(codec: u8) -> DataConfig {
        // ---
        DataConfig {
            codec,
            channels: 2,
            rate: 44100,
            sample_size: 2,
            pkt_len: 672,
            fd_opt: fd_opt::WRITE,
            channel_mode: channel_mode::JOINT_STEREO,
        }
    }

    fn sbc_record() -> SbcRecord {
        // ---
        SbcRecord {
            allocation: allocation::LOUDNESS,
            subbands: 8,
            blocks: 16,
            bitpool: 32,
        }
    }

    #[test]
    fn test_raw_config() {
        // ---
        let mut data = data_config(codec::NONE);
        data.channels = 1;
        data.rate = 8000;
        data.pkt_len = 48;

        let cfg = SessionConfig::from_records(&data, None).expect("raw config");
        assert_eq!(cfg.codec, Codec::Raw);
        assert_eq!(cfg.packet_len, 48);
        assert!(!cfg.is_sbc());
    }

    #[test]
    fn test_sbc_config() {
        // ---
        let cfg = SessionConfig::from_records(&data_config(codec::SBC), Some(&sbc_record()))
            .expect("sbc config");

        let Codec::Sbc(params) = cfg.codec else {
            panic!("expected SBC codec");
        };
        assert_eq!(params.channel_mode, ChannelMode::JointStereo);
        assert_eq!(params.allocation, Allocation::Loudness);
        assert_eq!(params.codesize(), 8 * 16 * 2 * 2);
    }

    #[test]
    fn test_sbc_without_record_is_config_error() {
        // ---
        let err = SessionConfig::from_records(&data_config(codec::SBC), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_packet_length_rejected() {
        // ---
        let mut data = data_config(codec::NONE);
        data.pkt_len = 0;
        assert!(matches!(
            SessionConfig::from_records(&data, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_codec_rejected() {
        // ---
        assert!(SessionConfig::from_records(&data_config(9), None).is_err());
    }

    #[test]
    fn test_hw_params_validation() {
        // ---
        assert!(HwParams::new(4, 4096, 1024).validate().is_ok());
        assert_eq!(HwParams::new(4, 4096, 1024).period_count(), 4);
        assert!(HwParams::new(0, 4096, 1024).validate().is_err());
        assert!(HwParams::new(4, 512, 1024).validate().is_err());
    }
}

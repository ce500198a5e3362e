//! Bluetooth PCM bridge.
//!
//! Moves interleaved PCM between a host audio framework and a Bluetooth
//! audio transport. The audio daemon negotiates the stream over a local
//! control socket and hands over a data socket; audio then travels either
//! as raw fixed-size packets (SCO) or as SBC frames in RTP/AVDTP media
//! packets sized to the negotiated MTU (A2DP).
//!
//! ```no_run
//! use bt_pcm::{Direction, HwParams, IoMode, PcmSession, PipelineConfig};
//!
//! let mut session = PcmSession::open(Direction::Playback, &PipelineConfig::default())?;
//! session.hw_params(HwParams::new(4, 8192, 1024))?;
//! session.prepare()?;
//! session.start()?;
//! let frames = session.write(&[0u8; 4096], IoMode::Blocking)?;
//! # let _ = frames;
//! # Ok::<(), bt_pcm::Error>(())
//! ```

pub mod accumulate;
pub mod audio;
pub mod codec;
pub mod config;
pub mod control;
mod encode;
pub mod error;
pub mod packet;
pub mod position;
mod raw;
pub mod sbc;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;

pub use codec::{FrameEncoder, SbcEncoderWrapper};
pub use config::{
    Codec, ControlAddress, Direction, HwParams, IoMode, PipelineConfig, SessionConfig,
};
pub use control::{ControlChannel, Negotiated};
pub use encode::EncodeTransfer;
pub use error::{Error, Result};
pub use raw::RawTransfer;
pub use sender::{FlushOutcome, RetryPolicy};
pub use session::{PathKind, PcmSession, PollDescriptor};
pub use stats::PipelineStats;
pub use transport::{DataTransport, SocketTransport, SocketTuning};

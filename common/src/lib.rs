//! Shared pieces of the Bluetooth PCM bridge.
//!
//! Wire formats spoken with the audio daemon and the Bluetooth peer, plus the
//! observability and CLI policy every binary in the workspace uses.

pub mod cli;
pub mod ipc;
pub mod observability;
pub mod rtp;

pub use cli::ColorWhen;
pub use ipc::{DataConfig, IpcError, IpcHeader, SbcRecord};
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
pub use rtp::{PayloadHeader, RtpHeader};

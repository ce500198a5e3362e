//! Host-facing PCM session.
//!
//! A session is opened once per stream: the handshake fixes the
//! [`SessionConfig`], the stream direction and codec pick one of four
//! transfer paths, and from then on the host drives it through
//! `hw_params`, `prepare`, `write`/`read` and `pointer`.

use std::os::fd::RawFd;
use std::time::Duration;

use bt_pcm_common::rtp::MEDIA_HEADER_LEN;
use bt_pcm_common::MetricsContext;
use tracing::{debug, info};

use crate::codec::{FrameEncoder, SbcEncoderWrapper};
use crate::config::{Codec, Direction, HwParams, IoMode, PipelineConfig, SessionConfig};
use crate::control::ControlChannel;
use crate::encode::EncodePath;
use crate::error::{Error, Result};
use crate::packet::MediaPacket;
use crate::position::PositionCounter;
use crate::raw::{RawReader, RawWriter};
use crate::sender::{FlushOutcome, RetryPolicy, TransportSender};
use crate::stats::{PipelineStats, Telemetry};
use crate::transport::{DataTransport, SocketTransport, SocketTuning};

/// Which transfer path a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    RawPlayback,
    RawCapture,
    EncodePlayback,
    EncodeCapture,
}

enum StreamPath {
    RawPlayback(RawWriter),
    RawCapture(RawReader),
    EncodePlayback(EncodePath<SbcEncoderWrapper>),
    /// Encoded capture is not carried by the daemon protocol; reads
    /// report no frames.
    EncodeCapture,
}

impl StreamPath {
    // ---
    fn kind(&self) -> PathKind {
        // ---
        match self {
            StreamPath::RawPlayback(_) => PathKind::RawPlayback,
            StreamPath::RawCapture(_) => PathKind::RawCapture,
            StreamPath::EncodePlayback(_) => PathKind::EncodePlayback,
            StreamPath::EncodeCapture => PathKind::EncodeCapture,
        }
    }
}

/// Descriptor and event mask the host should poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDescriptor {
    // ---
    pub fd: RawFd,
    pub events: libc::c_short,
}

/// One negotiated Bluetooth PCM stream.
pub struct PcmSession<T = SocketTransport> {
    // ---
    direction: Direction,
    config: SessionConfig,
    transport: T,
    /// Held for the lifetime of the session
    control: Option<ControlChannel>,
    path: StreamPath,
    hw: Option<HwParams>,
    position: PositionCounter,
    telemetry: Telemetry,
}

impl PcmSession<SocketTransport> {
    // ---
    /// Connects to the audio daemon, negotiates and builds the session.
    ///
    /// # Errors
    ///
    /// Any handshake failure; see [`ControlChannel::negotiate`].
    pub fn open(direction: Direction, pipeline: &PipelineConfig) -> Result<Self> {
        // ---
        let mut control = ControlChannel::connect(&pipeline.control_address)?;
        let negotiated = control.negotiate()?;

        let mut session =
            Self::with_transport(direction, negotiated.config, negotiated.transport, pipeline)?;
        session.control = Some(control);
        Ok(session)
    }
}

impl<T: DataTransport> PcmSession<T> {
    // ---
    /// Builds a session over an already negotiated transport.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when an SBC frame plus the media headers
    /// cannot fit in the negotiated MTU, or SBC is negotiated with
    /// samples other than 16-bit.
    pub fn with_transport(
        direction: Direction,
        config: SessionConfig,
        transport: T,
        pipeline: &PipelineConfig,
    ) -> Result<Self> {
        // ---
        let path = match (config.codec, direction) {
            (Codec::Raw, Direction::Playback) => StreamPath::RawPlayback(RawWriter::new(config.packet_len)),
            (Codec::Raw, Direction::Capture) => StreamPath::RawCapture(RawReader::new(config.packet_len)),
            (Codec::Sbc(params), Direction::Playback) => {
                if config.sample_size != 2 {
                    return Err(Error::config(format!(
                        "SBC needs 16-bit samples, negotiated {} bytes",
                        config.sample_size
                    )));
                }
                let encoder = SbcEncoderWrapper::new(params);
                let needed = MEDIA_HEADER_LEN + encoder.frame_length();
                if needed > config.packet_len {
                    return Err(Error::config(format!(
                        "SBC frame of {} bytes does not fit MTU {}",
                        encoder.frame_length(),
                        config.packet_len
                    )));
                }
                let sender = TransportSender::new(RetryPolicy::from_config(pipeline));
                StreamPath::EncodePlayback(EncodePath::new(encoder, config.packet_len, sender))
            }
            (Codec::Sbc(_), Direction::Capture) => {
                info!("SBC capture is not carried by the daemon; reads return no frames");
                StreamPath::EncodeCapture
            }
        };

        debug!("session path {:?}", path.kind());
        Ok(Self {
            direction,
            config,
            transport,
            control: None,
            path,
            hw: None,
            position: PositionCounter::new(1),
            telemetry: Telemetry::default(),
        })
    }

    /// Mirrors pipeline counters into `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.telemetry.metrics = Some(metrics);
        self
    }

    pub fn direction(&self) -> Direction {
        // ---
        self.direction
    }

    pub fn config(&self) -> &SessionConfig {
        // ---
        &self.config
    }

    pub fn kind(&self) -> PathKind {
        // ---
        self.path.kind()
    }

    pub fn hw(&self) -> Option<&HwParams> {
        // ---
        self.hw.as_ref()
    }

    pub fn stats(&self) -> &PipelineStats {
        // ---
        &self.telemetry.stats
    }

    pub fn transport(&self) -> &T {
        // ---
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        // ---
        &mut self.transport
    }

    /// The in-flight media packet (encoded playback only).
    pub fn media_packet(&self) -> Option<&MediaPacket> {
        // ---
        match &self.path {
            StreamPath::EncodePlayback(p) => Some(p.packet()),
            _ => None,
        }
    }

    /// PCM bytes waiting in the accumulation buffer.
    pub fn pending_bytes(&self) -> usize {
        // ---
        match &self.path {
            StreamPath::RawPlayback(w) => w.fill(),
            StreamPath::EncodePlayback(p) => p.fill(),
            StreamPath::RawCapture(_) | StreamPath::EncodeCapture => 0,
        }
    }

    /// Accumulation capacity: codesize for SBC, packet length for raw.
    pub fn window_size(&self) -> Option<usize> {
        // ---
        match &self.path {
            StreamPath::RawPlayback(_) | StreamPath::RawCapture(_) => Some(self.config.packet_len),
            StreamPath::EncodePlayback(p) => Some(p.codesize()),
            StreamPath::EncodeCapture => None,
        }
    }

    /// Accepts the host's buffer geometry and tunes the data socket.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the geometry is inconsistent or the frame size
    ///   does not divide the accumulation window
    /// - `Error::Io` if the socket options cannot be applied
    pub fn hw_params(&mut self, hw: HwParams) -> Result<()> {
        // ---
        hw.validate()?;

        if let Some(window) = self.window_size() {
            if window % hw.frame_size != 0 {
                return Err(Error::config(format!(
                    "frame size {} does not divide the {window}-byte transfer window",
                    hw.frame_size
                )));
            }
        }
        if self.config.is_sbc() && hw.frame_size != usize::from(self.config.channels) * 2 {
            return Err(Error::config(format!(
                "SBC needs interleaved 16-bit frames of {} bytes, got {}",
                usize::from(self.config.channels) * 2,
                hw.frame_size
            )));
        }

        let period_count = hw.period_count();
        let tuning = if self.config.is_sbc() {
            SocketTuning::Timeout {
                direction: self.direction,
                timeout: Duration::from_micros(period_count),
            }
        } else {
            SocketTuning::BufferCount {
                direction: self.direction,
                count: u32::try_from(period_count).unwrap_or(u32::MAX),
            }
        };
        self.transport.tune(tuning)?;

        self.position = PositionCounter::new(hw.buffer_size);
        self.hw = Some(hw);
        debug!(
            "hw params: frame_size={} buffer={} period={} periods={period_count}",
            hw.frame_size, hw.buffer_size, hw.period_size
        );
        Ok(())
    }

    fn frame_size(&self) -> Result<usize> {
        // ---
        self.hw
            .map(|hw| hw.frame_size)
            .ok_or_else(|| Error::config("hw_params must be set before transfers"))
    }

    /// Resets the position: zero for playback, one period for capture.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` before `hw_params`.
    pub fn prepare(&mut self) -> Result<()> {
        // ---
        let hw = self
            .hw
            .ok_or_else(|| Error::config("hw_params must be set before prepare"))?;
        match self.direction {
            Direction::Playback => self.position.reset_to(0),
            Direction::Capture => self.position.reset_to(hw.period_size),
        }
        debug!("prepared at position {}", self.position.get());
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        // ---
        debug!("start");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        // ---
        debug!("stop");
        Ok(())
    }

    /// Host-visible position in frames, modulo the ring buffer size.
    pub fn pointer(&self) -> u64 {
        // ---
        self.position.get()
    }

    /// Data socket plus the readiness the host should wait for.
    pub fn poll_descriptor(&self) -> Option<PollDescriptor> {
        // ---
        let events = match self.direction {
            Direction::Playback => libc::POLLOUT,
            Direction::Capture => libc::POLLIN,
        };
        self.transport
            .raw_fd()
            .map(|fd| PollDescriptor { fd, events })
    }

    /// Offers interleaved host-order frames for playback.
    ///
    /// Returns the number of frames consumed; frames that did not fit
    /// must be offered again.
    ///
    /// # Errors
    ///
    /// - `Error::Config` on a capture session or before `hw_params`
    /// - `Error::Io` for raw send failures; nothing was consumed and the
    ///   same frames should be offered again
    /// - `Error::Io` for a peer that went away on the encode path; the
    ///   frames offered in this call were consumed and encoded, and the
    ///   position already covers them, so they must not be offered again
    pub fn write(&mut self, pcm: &[u8], mode: IoMode) -> Result<usize> {
        // ---
        let frame_size = self.frame_size()?;
        match &mut self.path {
            StreamPath::RawPlayback(writer) => {
                let t = writer.write(pcm, frame_size, &mut self.transport, mode, &mut self.telemetry)?;
                if t.packet_done {
                    self.position
                        .advance((self.config.packet_len / frame_size) as u64);
                }
                Ok(t.frames)
            }
            StreamPath::EncodePlayback(path) => {
                match path.write(pcm, frame_size, &mut self.transport, mode, &mut self.telemetry) {
                    Ok(t) => {
                        self.position.advance(t.encoded as u64);
                        Ok(t.frames)
                    }
                    Err(gone) => {
                        self.position.advance(gone.transfer.encoded as u64);
                        Err(gone.error)
                    }
                }
            }
            StreamPath::RawCapture(_) | StreamPath::EncodeCapture => {
                Err(Error::config("write on a capture session"))
            }
        }
    }

    /// Fills `out` with captured interleaved frames.
    ///
    /// Returns the number of frames produced.
    ///
    /// # Errors
    ///
    /// - `Error::Config` on a playback session or before `hw_params`
    /// - `Error::Io` for receive failures and short reads
    pub fn read(&mut self, out: &mut [u8], mode: IoMode) -> Result<usize> {
        // ---
        let frame_size = self.frame_size()?;
        match &mut self.path {
            StreamPath::RawCapture(reader) => {
                let t = reader.read(out, frame_size, &mut self.transport, mode, &mut self.telemetry)?;
                if t.packet_done {
                    self.position
                        .advance((self.config.packet_len / frame_size) as u64);
                }
                Ok(t.frames)
            }
            StreamPath::EncodeCapture => Ok(0),
            StreamPath::RawPlayback(_) | StreamPath::EncodePlayback(_) => {
                Err(Error::config("read on a playback session"))
            }
        }
    }

    /// Sends a partly filled media packet, if any.
    ///
    /// Buffered PCM short of a full codec window stays buffered.
    ///
    /// # Errors
    ///
    /// Returns the flush error, if any.
    pub fn drain(&mut self, mode: IoMode) -> Result<Option<FlushOutcome>> {
        // ---
        match &mut self.path {
            StreamPath::EncodePlayback(path) => path.drain(&mut self.transport, mode, &mut self.telemetry),
            _ => Ok(None),
        }
    }

    /// Drops PCM buffered but not yet sent or handed out.
    pub fn discard_pending(&mut self) {
        // ---
        match &mut self.path {
            StreamPath::RawPlayback(w) => w.clear(),
            StreamPath::RawCapture(r) => r.clear(),
            StreamPath::EncodePlayback(p) => p.clear(),
            StreamPath::EncodeCapture => {}
        }
    }

    /// Ends the session, releasing both sockets and the encoder.
    pub fn close(self) {
        // ---
        self.telemetry.stats.log();
        info!("session closed");
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::sbc::{Allocation, ChannelMode, SamplingFrequency, SbcParams};
    use std::io;

    #[derive(Default)]
    struct NullTransport {
        tuned: Vec<SocketTuning>,
    }

    impl DataTransport for NullTransport {
        fn send(&mut self, buf: &[u8], _mode: IoMode) -> io::Result<usize> {
            // ---
            Ok(buf.len())
        }

        fn recv(&mut self, buf: &mut [u8], _mode: IoMode) -> io::Result<usize> {
            // ---
            Ok(buf.len())
        }

        fn raw_fd(&self) -> Option<RawFd> {
            // ---
            Some(42)
        }

        fn tune(&mut self, tuning: SocketTuning) -> io::Result<()> {
            // ---
            self.tuned.push(tuning);
            Ok(())
        }
    }

    fn raw_config() -> SessionConfig {
        // ---
        SessionConfig {
            codec: Codec::Raw,
            channels: 1,
            rate: 8000,
            sample_size: 2,
            packet_len: 48,
            fd_opt: 2,
        }
    }

    fn sbc_config(mtu: usize) -> SessionConfig {
        // ---
        let params = SbcParams::new(
            SamplingFrequency::F44100,
            ChannelMode::JointStereo,
            16,
            8,
            Allocation::Loudness,
            32,
        )
        .expect("params");
        SessionConfig {
            codec: Codec::Sbc(params),
            channels: 2,
            rate: 44100,
            sample_size: 2,
            packet_len: mtu,
            fd_opt: 1,
        }
    }

    fn session(direction: Direction, config: SessionConfig) -> Result<PcmSession<NullTransport>> {
        // ---
        PcmSession::with_transport(
            direction,
            config,
            NullTransport::default(),
            &PipelineConfig::default(),
        )
    }

    #[test]
    fn test_path_selection() {
        // ---
        let kind = |d, c| session(d, c).expect("session").kind();
        assert_eq!(kind(Direction::Playback, raw_config()), PathKind::RawPlayback);
        assert_eq!(kind(Direction::Capture, raw_config()), PathKind::RawCapture);
        assert_eq!(kind(Direction::Playback, sbc_config(672)), PathKind::EncodePlayback);
        assert_eq!(kind(Direction::Capture, sbc_config(672)), PathKind::EncodeCapture);
    }

    #[test]
    fn test_mtu_too_small_for_one_frame() {
        // ---
        let err = session(Direction::Playback, sbc_config(50)).err().expect("config error");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_transfers_need_hw_params() {
        // ---
        let mut s = session(Direction::Playback, raw_config()).expect("session");
        assert!(matches!(s.write(&[0; 48], IoMode::Blocking), Err(Error::Config(_))));
        assert!(s.prepare().is_err());
    }

    #[test]
    fn test_hw_params_tunes_socket() {
        // ---
        let mut raw = session(Direction::Playback, raw_config()).expect("raw");
        raw.hw_params(HwParams::new(2, 4096, 1024)).expect("raw hw");
        assert_eq!(
            raw.transport().tuned,
            vec![SocketTuning::BufferCount {
                direction: Direction::Playback,
                count: 4
            }]
        );

        let mut sbc = session(Direction::Playback, sbc_config(672)).expect("sbc");
        sbc.hw_params(HwParams::new(4, 8192, 1024)).expect("sbc hw");
        assert_eq!(
            sbc.transport().tuned,
            vec![SocketTuning::Timeout {
                direction: Direction::Playback,
                timeout: Duration::from_micros(8)
            }]
        );
    }

    #[test]
    fn test_hw_params_rejects_frame_size_not_dividing_window() {
        // ---
        let mut s = session(Direction::Playback, raw_config()).expect("session");
        assert!(s.hw_params(HwParams::new(5, 4096, 1024)).is_err());

        let mut sbc = session(Direction::Playback, sbc_config(672)).expect("sbc");
        assert!(sbc.hw_params(HwParams::new(2, 4096, 1024)).is_err());
    }

    #[test]
    fn test_prepare_positions() {
        // ---
        let mut play = session(Direction::Playback, raw_config()).expect("play");
        play.hw_params(HwParams::new(2, 4096, 1024)).expect("hw");
        play.write(&[0; 48], IoMode::Blocking).expect("write");
        assert_eq!(play.pointer(), 24);
        play.prepare().expect("prepare");
        assert_eq!(play.pointer(), 0);

        let mut cap = session(Direction::Capture, raw_config()).expect("cap");
        cap.hw_params(HwParams::new(2, 4096, 1024)).expect("hw");
        cap.prepare().expect("prepare");
        assert_eq!(cap.pointer(), 1024);
    }

    #[test]
    fn test_poll_descriptor_events_follow_direction() {
        // ---
        let play = session(Direction::Playback, raw_config()).expect("play");
        let cap = session(Direction::Capture, raw_config()).expect("cap");

        assert_eq!(
            play.poll_descriptor(),
            Some(PollDescriptor {
                fd: 42,
                events: libc::POLLOUT
            })
        );
        assert_eq!(cap.poll_descriptor().map(|p| p.events), Some(libc::POLLIN));
    }

    #[test]
    fn test_encode_capture_reads_nothing() {
        // ---
        let mut s = session(Direction::Capture, sbc_config(672)).expect("session");
        s.hw_params(HwParams::new(4, 4096, 1024)).expect("hw");
        let mut out = [0u8; 64];
        assert_eq!(s.read(&mut out, IoMode::Blocking).expect("read"), 0);
        assert!(s.write(&[0; 4], IoMode::Blocking).is_err());
    }
}

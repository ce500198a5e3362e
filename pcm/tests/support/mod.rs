//! Shared test peers: a fake audio daemon and a scripted data transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixDatagram, UnixListener, UnixStream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bt_pcm::sbc::{Allocation, ChannelMode, SamplingFrequency, SbcParams};
use bt_pcm::{Codec, DataTransport, IoMode, PipelineConfig, SessionConfig};
use bt_pcm_common::ipc::{self, packet_type, DataConfig, IpcHeader, SbcRecord};

/// What the fake daemon answers to a configuration request.
#[derive(Debug, Clone)]
pub struct Reply {
    // ---
    pub packet_type: u8,
    pub error: u8,
    pub data: DataConfig,
    pub sbc: Option<SbcRecord>,
    /// Replaces the computed payload length
    pub length_override: Option<u8>,
    /// Send the response header alone and hold the socket open
    pub header_only: bool,
    /// Packet type of the descriptor-carrying message
    pub fd_packet_type: u8,
    /// Attach the data socket to the descriptor message
    pub pass_fd: bool,
    /// Datagrams queued on the data socket before it is handed over
    pub stale: Vec<Vec<u8>>,
}

impl Reply {
    // ---
    /// Raw (SCO-style) stream: mono, 8 kHz, 48-byte packets.
    pub fn raw() -> Self {
        // ---
        Self {
            packet_type: packet_type::CFG_RSP,
            error: ipc::ERROR_NONE,
            data: DataConfig {
                codec: ipc::codec::NONE,
                channels: 1,
                rate: 8000,
                sample_size: 2,
                pkt_len: 48,
                fd_opt: ipc::fd_opt::READ_WRITE,
                channel_mode: ipc::channel_mode::MONO,
            },
            sbc: None,
            length_override: None,
            header_only: false,
            fd_packet_type: packet_type::CFG_RSP,
            pass_fd: true,
            stale: Vec::new(),
        }
    }

    /// SBC stream: joint stereo, 44.1 kHz, 672-byte MTU.
    pub fn sbc() -> Self {
        // ---
        Self {
            data: DataConfig {
                codec: ipc::codec::SBC,
                channels: 2,
                rate: 44100,
                sample_size: 2,
                pkt_len: 672,
                fd_opt: ipc::fd_opt::WRITE,
                channel_mode: ipc::channel_mode::JOINT_STEREO,
            },
            sbc: Some(SbcRecord {
                allocation: ipc::allocation::LOUDNESS,
                subbands: 8,
                blocks: 16,
                bitpool: 32,
            }),
            ..Self::raw()
        }
    }

    fn payload_len(&self) -> u8 {
        // ---
        let computed = DataConfig::LEN + self.sbc.map_or(0, |_| SbcRecord::LEN);
        self.length_override.unwrap_or(computed as u8)
    }
}

/// Sends `packet` with `fd` attached as `SCM_RIGHTS`, if given.
pub fn send_with_fd(stream: &UnixStream, packet: &[u8], fd: Option<RawFd>) -> io::Result<()> {
    // ---
    let mut iov = libc::iovec {
        iov_base: packet.as_ptr() as *mut libc::c_void,
        iov_len: packet.len(),
    };
    let mut control = [0u64; 8];
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(fd) = fd {
        let space = unsafe { libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as libc::c_uint) };
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::c_int>() as libc::c_uint) as _;
            (libc::CMSG_DATA(cmsg) as *mut libc::c_int).write_unaligned(fd);
        }
    }

    let ret = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, 0) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Answers one configuration request on `stream`.
///
/// Returns the far end of the data socket.
pub fn serve(mut stream: UnixStream, reply: Reply) -> io::Result<UnixDatagram> {
    // ---
    let mut request = [0u8; IpcHeader::LEN];
    stream.read_exact(&mut request)?;
    let header = IpcHeader::from_bytes(&request)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    assert_eq!(header.packet_type, packet_type::CFG_REQ, "daemon expects a config request");

    let response = IpcHeader {
        packet_type: reply.packet_type,
        role: ipc::role::NONE,
        error: reply.error,
        length: reply.payload_len(),
    };
    stream.write_all(&response.to_bytes())?;
    if reply.header_only {
        // Hold the socket until the client hangs up.
        io::copy(&mut stream, &mut io::sink())?;
        return Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "client hung up after the header",
        ));
    }
    stream.write_all(&reply.data.to_bytes())?;
    if let Some(sbc) = reply.sbc {
        stream.write_all(&sbc.to_bytes())?;
    }

    let (ours, theirs) = UnixDatagram::pair()?;
    for datagram in &reply.stale {
        theirs.send(datagram)?;
    }

    let fd_header = IpcHeader {
        packet_type: reply.fd_packet_type,
        role: ipc::role::NONE,
        error: ipc::ERROR_NONE,
        length: 0,
    };
    let fd = reply.pass_fd.then(|| ours.as_raw_fd());
    // The reply may be refused before the client reads this far.
    let _ = send_with_fd(&stream, &fd_header.to_bytes(), fd);
    Ok(theirs)
}

/// Runs [`serve`] on a thread over one end of a socket pair.
///
/// Returns the client end and the daemon thread.
pub fn spawn_pair(reply: Reply) -> (UnixStream, JoinHandle<io::Result<UnixDatagram>>) {
    // ---
    let (client, server) = UnixStream::pair().expect("control socket pair");
    let handle = thread::spawn(move || serve(server, reply));
    (client, handle)
}

/// Runs [`serve`] on a thread behind a listening socket at `path`.
pub fn spawn_listener(path: &Path, reply: Reply) -> JoinHandle<io::Result<UnixDatagram>> {
    // ---
    let listener = UnixListener::bind(path).expect("bind control socket");
    thread::spawn(move || {
        let (stream, _) = listener.accept()?;
        serve(stream, reply)
    })
}

/// Data transport answering sends and receives from a script.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    // ---
    /// Replies for successive sends; an empty script accepts everything
    pub send_replies: VecDeque<io::Result<usize>>,
    /// Every buffer offered to `send`, in call order
    pub send_calls: Vec<Vec<u8>>,
    /// Packets returned by successive receives
    pub incoming: VecDeque<Vec<u8>>,
}

impl ScriptedTransport {
    // ---
    pub fn with_sends(replies: impl IntoIterator<Item = io::Result<usize>>) -> Self {
        // ---
        Self {
            send_replies: replies.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl DataTransport for ScriptedTransport {
    fn send(&mut self, buf: &[u8], _mode: IoMode) -> io::Result<usize> {
        // ---
        self.send_calls.push(buf.to_vec());
        match self.send_replies.pop_front() {
            Some(Ok(n)) => Ok(n.min(buf.len())),
            Some(Err(e)) => Err(e),
            None => Ok(buf.len()),
        }
    }

    fn recv(&mut self, buf: &mut [u8], _mode: IoMode) -> io::Result<usize> {
        // ---
        match self.incoming.pop_front() {
            Some(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

/// Mono 16 kHz SBC parameters with small frames.
pub fn small_sbc_params() -> SbcParams {
    // ---
    SbcParams::new(
        SamplingFrequency::F16000,
        ChannelMode::Mono,
        8,
        4,
        Allocation::Snr,
        16,
    )
    .expect("valid SBC params")
}

pub fn sbc_session_config(params: SbcParams, mtu: usize) -> SessionConfig {
    // ---
    SessionConfig {
        codec: Codec::Sbc(params),
        channels: params.channels() as u8,
        rate: params.frequency.hz(),
        sample_size: 2,
        packet_len: mtu,
        fd_opt: ipc::fd_opt::WRITE,
    }
}

pub fn raw_session_config(packet_len: usize) -> SessionConfig {
    // ---
    SessionConfig {
        codec: Codec::Raw,
        channels: 1,
        rate: 8000,
        sample_size: 2,
        packet_len,
        fd_opt: ipc::fd_opt::READ_WRITE,
    }
}

/// Pipeline settings that retry without sleeping.
pub fn fast_pipeline() -> PipelineConfig {
    // ---
    PipelineConfig {
        retry_interval: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

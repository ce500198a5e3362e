//! Control channel client.
//!
//! One request/response exchange with the audio daemon negotiates the
//! stream parameters. A second response carries the data socket as
//! `SCM_RIGHTS` ancillary data.

use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixStream};

use bt_pcm_common::ipc::{packet_type, DataConfig, IpcHeader, SbcRecord, ERROR_NONE};
use tracing::{debug, info, warn};

use crate::config::{Codec, ControlAddress, SessionConfig};
use crate::error::{Error, Result};
use crate::transport::SocketTransport;

/// Size of `sun_path` in `sockaddr_un`.
const SUN_PATH_LEN: usize = 108;

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct Negotiated {
    // ---
    pub config: SessionConfig,
    /// Data socket, already drained of stale data
    pub transport: SocketTransport,
}

/// Connection to the audio daemon's control socket.
#[derive(Debug)]
pub struct ControlChannel {
    // ---
    stream: UnixStream,
}

fn read_response(stream: &mut UnixStream, buf: &mut [u8], what: &str) -> Result<()> {
    // ---
    stream.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::protocol(format!("control channel closed before {what}")),
        _ => Error::Io(e),
    })
}

impl ControlChannel {
    // ---
    /// Connects to the daemon.
    ///
    /// Abstract names are padded with NUL bytes to the full `sun_path`
    /// length, which is how the daemon binds its socket.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the socket cannot be connected.
    pub fn connect(address: &ControlAddress) -> Result<Self> {
        // ---
        let stream = match address {
            ControlAddress::Abstract(name) => {
                let mut padded = name.as_bytes().to_vec();
                if padded.len() < SUN_PATH_LEN - 1 {
                    padded.resize(SUN_PATH_LEN - 1, 0);
                }
                let addr = SocketAddr::from_abstract_name(&padded)?;
                UnixStream::connect_addr(&addr)?
            }
            ControlAddress::Path(path) => UnixStream::connect(path)?,
        };
        debug!("connected to audio daemon at {address:?}");
        Ok(Self { stream })
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        // ---
        Self { stream }
    }

    /// Runs the full handshake.
    ///
    /// Sends a configuration request, validates the response, receives the
    /// data socket and drains anything already queued on it.
    ///
    /// # Errors
    ///
    /// - `Error::Protocol` for a wrong packet type, a length field that does
    ///   not match the bytes received, or a missing descriptor
    /// - `Error::Rejected` when the daemon reports a failure status
    /// - `Error::Config` for parameters this pipeline cannot serve
    /// - `Error::Io` for socket failures
    pub fn negotiate(&mut self) -> Result<Negotiated> {
        // ---
        let config = self.request_config()?;
        let fd = self.receive_descriptor()?;

        let transport = SocketTransport::new(fd);
        let mut scratch = vec![0u8; config.packet_len];
        transport.drain(&mut scratch);

        Ok(Negotiated { config, transport })
    }

    /// Sends the request and reads back the configuration records.
    fn request_config(&mut self) -> Result<SessionConfig> {
        // ---
        self.stream
            .write_all(&IpcHeader::config_request().to_bytes())?;

        // Rejections may carry the header alone.
        let mut head = [0u8; IpcHeader::LEN];
        read_response(&mut self.stream, &mut head, "configuration response")?;

        let header = IpcHeader::from_bytes(&head)?;
        if header.packet_type != packet_type::CFG_RSP {
            return Err(Error::protocol(format!(
                "unexpected packet type {} in configuration response",
                header.packet_type
            )));
        }
        if header.error != ERROR_NONE {
            return Err(Error::Rejected { code: header.error });
        }

        let mut base = [0u8; DataConfig::LEN];
        read_response(&mut self.stream, &mut base, "configuration record")?;
        let data = DataConfig::from_bytes(&base)?;
        let mut received = DataConfig::LEN;

        let sbc = if data.codec == bt_pcm_common::ipc::codec::SBC {
            let mut ext = [0u8; SbcRecord::LEN];
            read_response(&mut self.stream, &mut ext, "SBC parameters")?;
            received += SbcRecord::LEN;
            Some(SbcRecord::from_bytes(&ext)?)
        } else {
            None
        };

        if usize::from(header.length) != received {
            return Err(Error::protocol(format!(
                "size mismatch: header announces {} bytes, received {received}",
                header.length
            )));
        }

        let config = SessionConfig::from_records(&data, sbc.as_ref())?;
        match &config.codec {
            Codec::Raw => info!(
                "negotiated raw stream: channels={} rate={} sample_size={} pkt_len={}",
                config.channels, config.rate, config.sample_size, config.packet_len
            ),
            Codec::Sbc(p) => info!(
                "negotiated SBC stream: channels={} rate={} mtu={} mode={:?} subbands={} blocks={} bitpool={} allocation={:?}",
                config.channels,
                config.rate,
                config.packet_len,
                p.channel_mode,
                p.subbands,
                p.blocks,
                p.bitpool,
                p.allocation
            ),
        }
        Ok(config)
    }

    /// Receives the response packet carrying the data socket.
    fn receive_descriptor(&mut self) -> Result<OwnedFd> {
        // ---
        let mut packet = [0u8; IpcHeader::LEN];
        // u64 storage keeps the control buffer aligned for cmsghdr.
        let mut control = [0u64; 8];
        let space = unsafe { libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as libc::c_uint) } as usize;
        debug_assert!(space <= mem::size_of_val(&control));

        let mut iov = libc::iovec {
            iov_base: packet.as_mut_ptr().cast(),
            iov_len: packet.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;

        let ret = unsafe { libc::recvmsg(self.stream.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        // Take ownership of every passed descriptor so none leak.
        let mut fds = Vec::new();
        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg.is_null() {
            let hdr = unsafe { &*cmsg };
            if hdr.cmsg_level == libc::SOL_SOCKET && hdr.cmsg_type == libc::SCM_RIGHTS {
                let header_len = unsafe { libc::CMSG_LEN(0) } as usize;
                let count = (hdr.cmsg_len as usize).saturating_sub(header_len)
                    / mem::size_of::<libc::c_int>();
                let data = unsafe { libc::CMSG_DATA(cmsg) } as *const libc::c_int;
                for i in 0..count {
                    let fd = unsafe { data.add(i).read_unaligned() };
                    fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
                }
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
        }
        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            warn!("ancillary data truncated while receiving data socket");
        }

        let header = IpcHeader::from_bytes(&packet[..ret as usize])?;
        if header.packet_type != packet_type::CFG_RSP {
            return Err(Error::protocol(format!(
                "unexpected packet type {} while waiting for data socket",
                header.packet_type
            )));
        }

        let mut fds = fds.into_iter();
        let fd = fds
            .next()
            .ok_or_else(|| Error::protocol("no data socket in descriptor packet"))?;
        debug!("received data socket fd={}", fd.as_raw_fd());
        Ok(fd)
    }
}

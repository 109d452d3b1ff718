//! Length-framed message channel
//!
//! Messages travel over a Unix stream socket:
//!
//! ```text
//! 0       4      6       8        12      16
//! +-------+------+-------+--------+-------+-----------+
//! | type  | len  | flags | peerid |  pid  | payload.. |
//! +-------+------+-------+--------+-------+-----------+
//! ```
//!
//! All header fields are native endian and `len` includes the header. A
//! message carrying a descriptor sets [`IMSGF_HASFD`]; the descriptor rides
//! as `SCM_RIGHTS` ancillary data alongside the first byte of the message.

use crate::error::{FrontendError, FrontendResult};
use crate::message::ImsgType;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

pub const IMSG_HEADER_SIZE: usize = 16;
pub const MAX_IMSGSIZE: usize = 16384;

/// Header flag: a descriptor accompanies this message
pub const IMSGF_HASFD: u16 = 1;

/// Most descriptors accepted in one read
const MAX_FDS_PER_READ: usize = 4;

/// One received message
#[derive(Debug)]
pub struct Imsg {
    pub kind: u32,
    pub peer_id: u32,
    pub pid: u32,
    pub data: Vec<u8>,
    pub fd: Option<OwnedFd>,
}

impl Imsg {
    pub fn tag(&self) -> Option<ImsgType> {
        ImsgType::from_u32(self.kind)
    }

    /// Take the attached descriptor; its absence is a protocol violation.
    pub fn take_fd(&mut self, what: &str) -> FrontendResult<OwnedFd> {
        self.fd
            .take()
            .ok_or_else(|| FrontendError::Protocol(format!("{}: expected to receive fd", what)))
    }

    /// Require an empty payload.
    pub fn expect_empty(&self, what: &str) -> FrontendResult<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(FrontendError::Protocol(format!(
                "{} wrong length: {}",
                what,
                self.data.len()
            )))
        }
    }
}

struct Outgoing {
    bytes: Vec<u8>,
    sent: usize,
    fd: Option<OwnedFd>,
}

/// Buffered reader and writer for one channel
pub struct ImsgBuf {
    rbuf: Vec<u8>,
    fds: VecDeque<OwnedFd>,
    wqueue: VecDeque<Outgoing>,
    pid: u32,
}

impl Default for ImsgBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl ImsgBuf {
    pub fn new() -> Self {
        Self {
            rbuf: Vec::with_capacity(MAX_IMSGSIZE),
            fds: VecDeque::new(),
            wqueue: VecDeque::new(),
            pid: std::process::id(),
        }
    }

    /// Queue a message for sending.
    pub fn compose(
        &mut self,
        kind: ImsgType,
        peer_id: u32,
        fd: Option<OwnedFd>,
        data: &[u8],
    ) -> FrontendResult<()> {
        let len = IMSG_HEADER_SIZE + data.len();
        if len > MAX_IMSGSIZE {
            return Err(FrontendError::Protocol(format!(
                "message of {} bytes exceeds maximum",
                len
            )));
        }
        let flags = if fd.is_some() { IMSGF_HASFD } else { 0 };

        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&(kind as u32).to_ne_bytes());
        bytes.extend_from_slice(&(len as u16).to_ne_bytes());
        bytes.extend_from_slice(&flags.to_ne_bytes());
        bytes.extend_from_slice(&peer_id.to_ne_bytes());
        bytes.extend_from_slice(&self.pid.to_ne_bytes());
        bytes.extend_from_slice(data);

        self.wqueue.push_back(Outgoing { bytes, sent: 0, fd });
        Ok(())
    }

    /// Unsent bytes remain queued
    pub fn has_pending(&self) -> bool {
        !self.wqueue.is_empty()
    }

    /// Read whatever the socket holds. Returns the byte count; zero means
    /// the peer closed the channel.
    pub fn read_from(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut buf = [0u8; MAX_IMSGSIZE];
        let mut iov = [IoSliceMut::new(&mut buf)];
        let mut cmsg_buf = nix::cmsg_space!([RawFd; MAX_FDS_PER_READ]);

        let msg = recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
            .map_err(io::Error::from)?;
        let n = msg.bytes;

        for cmsg in msg.cmsgs().map_err(io::Error::from)? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                for raw in received {
                    self.fds.push_back(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }

        self.rbuf.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    /// Pop the next complete message, if one is buffered.
    pub fn get(&mut self) -> FrontendResult<Option<Imsg>> {
        if self.rbuf.len() < IMSG_HEADER_SIZE {
            return Ok(None);
        }
        let h = &self.rbuf[..IMSG_HEADER_SIZE];
        let kind = u32::from_ne_bytes([h[0], h[1], h[2], h[3]]);
        let len = u16::from_ne_bytes([h[4], h[5]]) as usize;
        let flags = u16::from_ne_bytes([h[6], h[7]]);
        let peer_id = u32::from_ne_bytes([h[8], h[9], h[10], h[11]]);
        let pid = u32::from_ne_bytes([h[12], h[13], h[14], h[15]]);

        if !(IMSG_HEADER_SIZE..=MAX_IMSGSIZE).contains(&len) {
            return Err(FrontendError::Protocol(format!(
                "bad message length {} for type {}",
                len, kind
            )));
        }
        if self.rbuf.len() < len {
            return Ok(None);
        }

        let data = self.rbuf[IMSG_HEADER_SIZE..len].to_vec();
        self.rbuf.drain(..len);
        let fd = if flags & IMSGF_HASFD != 0 {
            self.fds.pop_front()
        } else {
            None
        };

        Ok(Some(Imsg {
            kind,
            peer_id,
            pid,
            data,
            fd,
        }))
    }

    /// Write as much of the queue as the socket takes. Stops quietly when
    /// the socket would block.
    pub fn flush_to(&mut self, fd: RawFd) -> io::Result<()> {
        while let Some(out) = self.wqueue.front_mut() {
            let iov = [IoSlice::new(&out.bytes[out.sent..])];
            let attached: Vec<RawFd> = out.fd.iter().map(AsRawFd::as_raw_fd).collect();
            let cmsgs: Vec<ControlMessage<'_>> = if attached.is_empty() {
                Vec::new()
            } else {
                vec![ControlMessage::ScmRights(&attached)]
            };

            match sendmsg::<()>(fd, &iov, &cmsgs, MsgFlags::empty(), None) {
                Ok(n) => {
                    // the peer holds its own copy once any byte is out
                    out.fd = None;
                    out.sent += n;
                    if out.sent == out.bytes.len() {
                        self.wqueue.pop_front();
                    }
                }
                Err(nix::errno::Errno::EAGAIN) => return Ok(()),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

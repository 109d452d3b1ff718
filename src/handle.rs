//! Capture and transmit handles
//!
//! Handles arrive as descriptors from the main process. The receiving side
//! owns them outright: dropping a handle closes the descriptor and stops
//! any readiness monitoring attached to it.

use std::io::{self, IoSlice};
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use tokio::task::AbortHandle;

/// Raw link-layer socket: reads capture records, writes whole frames
pub trait LinkSocket: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;
    /// Descriptor to watch for readability
    fn raw_fd(&self) -> RawFd;
}

/// Datagram socket for unicast transmission to a known server
pub trait DatagramSocket: Send {
    fn send_to(&self, buf: &[u8], to: SocketAddrV4) -> io::Result<usize>;
}

/// A descriptor received from the main process
#[derive(Debug)]
pub struct FdSocket {
    fd: OwnedFd,
}

impl FdSocket {
    /// Take ownership of `fd`, switching it to non-blocking mode.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        Ok(Self { fd })
    }
}

/// Put a descriptor into non-blocking mode.
pub fn set_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

impl AsRawFd for FdSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl LinkSocket for FdSocket {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(nix::unistd::read(self.fd.as_raw_fd(), buf)?)
    }

    fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Ok(nix::sys::uio::writev(&self.fd, bufs)?)
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl DatagramSocket for FdSocket {
    fn send_to(&self, buf: &[u8], to: SocketAddrV4) -> io::Result<usize> {
        use nix::sys::socket::{sendto, MsgFlags, SockaddrIn};

        let addr = SockaddrIn::from(to);
        sendto(self.fd.as_raw_fd(), buf, &addr, MsgFlags::empty()).map_err(io::Error::from)
    }
}

/// Capture handle installed on an interface
pub struct CaptureHandle {
    socket: Arc<dyn LinkSocket>,
    monitor: Option<AbortHandle>,
}

impl CaptureHandle {
    pub fn new(socket: Arc<dyn LinkSocket>) -> Self {
        Self {
            socket,
            monitor: None,
        }
    }

    pub fn socket(&self) -> &Arc<dyn LinkSocket> {
        &self.socket
    }

    /// Attach the task watching this handle for readability. It is aborted
    /// when the handle is dropped.
    pub fn set_monitor(&mut self, monitor: AbortHandle) {
        if let Some(old) = self.monitor.replace(monitor) {
            old.abort();
        }
    }

    pub fn is_monitored(&self) -> bool {
        self.monitor.is_some()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

/// Transmit handle installed on an interface
pub type TransmitHandle = Box<dyn DatagramSocket>;

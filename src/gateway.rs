//! Packet I/O gateway
//!
//! Transmits DHCP client messages on an interface's capture handle
//! (broadcast, wrapped in Ethernet/IPv4/UDP) or transmit handle (unicast to
//! a known server), and forwards captured DHCP payloads to the engine.

use crate::handle::{CaptureHandle, LinkSocket};
use crate::message::{ImsgDhcp, ImsgReqRequest, ToEngine, Upstream};
use crate::registry::{Interface, InterfaceRegistry};
use crate::wire::frame::SERVER_PORT;
use crate::wire::{CapturedFrames, DhcpMessageType, FrameHeaders, PacketBuilder};
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Bytes read from one interface's capture handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub if_index: u32,
    pub data: Vec<u8>,
}

/// Builds and sends DHCP client messages
pub struct Gateway {
    builder: PacketBuilder,
}

impl Gateway {
    pub fn new(builder: PacketBuilder) -> Self {
        Self { builder }
    }

    /// Record the engine's transaction id and send a DISCOVER.
    pub fn send_discover(&mut self, iface: &mut Interface, xid: u32) {
        iface.xid = xid;
        self.dispatch_discover(iface);
    }

    /// Record the engine's request parameters and send a REQUEST.
    pub fn send_request(&mut self, iface: &mut Interface, req: &ImsgReqRequest) {
        iface.xid = req.xid;
        iface.requested_ip = req.requested_ip;
        iface.server_identifier = req.server_identifier;
        iface.dhcp_server = req.dhcp_server;
        self.dispatch_request(iface);
    }

    /// Send a DISCOVER, or defer it until a capture handle arrives.
    pub fn dispatch_discover(&mut self, iface: &mut Interface) {
        if !iface.has_capture() {
            debug!("deferring discover on interface {}", iface.if_index);
            iface.send_discover = true;
            return;
        }
        iface.send_discover = false;

        let packet = self.builder.build(
            DhcpMessageType::Discover,
            iface.xid,
            &iface.hw_address,
            iface.requested_ip,
            std::net::Ipv4Addr::UNSPECIFIED,
        );
        debug!("send_discover, pkt_len: {}", packet.len());
        send_via_capture(iface, packet);
    }

    /// Send a REQUEST: unicast when the server is known, broadcast otherwise.
    pub fn dispatch_request(&mut self, iface: &Interface) {
        let packet = self.builder.build(
            DhcpMessageType::Request,
            iface.xid,
            &iface.hw_address,
            iface.requested_ip,
            iface.server_identifier,
        );
        debug!("send_request, pkt_len: {}", packet.len());
        if iface.dhcp_server.is_unspecified() {
            send_via_capture(iface, packet);
        } else {
            send_via_udp(iface, packet);
        }
    }

    /// Install a capture handle and flush a deferred DISCOVER.
    pub fn grant_capture_handle(&mut self, iface: &mut Interface, handle: CaptureHandle) {
        if iface.capture.replace(handle).is_some() {
            warn!("replacing capture handle on interface {}", iface.if_index);
        }
        if iface.send_discover {
            self.dispatch_discover(iface);
        }
    }
}

/// Wrap `packet` in broadcast headers and write it to the capture handle.
pub fn send_via_capture(iface: &Interface, packet: &[u8]) {
    let Some(capture) = iface.capture.as_ref() else {
        warn!("no capture handle on interface {}", iface.if_index);
        return;
    };
    let headers = FrameHeaders::broadcast(&iface.hw_address, packet);
    let total = headers.frame_len(packet);

    match capture.socket().write_vectored(&headers.io_slices(packet)) {
        Ok(n) if n < total => warn!("failed to send entire packet: {} < {}", n, total),
        Ok(_) => {}
        Err(e) => warn!("write: {}", e),
    }
}

/// Send `packet` to the interface's DHCP server on the transmit handle.
pub fn send_via_udp(iface: &Interface, packet: &[u8]) {
    let Some(transmit) = iface.transmit.as_ref() else {
        warn!("sendto: no udp socket on interface {}", iface.if_index);
        return;
    };
    let to = SocketAddrV4::new(iface.dhcp_server, SERVER_PORT);
    if let Err(e) = transmit.send_to(packet, to) {
        warn!("sendto: {}", e);
    }
}

/// Forward every valid DHCP payload in a capture read to the engine.
///
/// Reads from a handle that has since been removed are dropped.
pub fn on_capture_readable(
    event: &CaptureEvent,
    registry: &InterfaceRegistry,
    upstream: &mut dyn Upstream,
) -> usize {
    match registry.lookup(event.if_index) {
        Some(iface) if iface.has_capture() => {}
        _ => {
            debug!("capture data for stale interface {}", event.if_index);
            return 0;
        }
    }

    let mut forwarded = 0;
    for payload in CapturedFrames::new(&event.data) {
        if let Some(dhcp) = ImsgDhcp::new(event.if_index, payload) {
            upstream.to_engine(ToEngine::Dhcp(dhcp));
            forwarded += 1;
        }
    }
    forwarded
}

struct Watched(Arc<dyn LinkSocket>);

impl AsRawFd for Watched {
    fn as_raw_fd(&self) -> RawFd {
        self.0.raw_fd()
    }
}

/// Watch a capture handle for readability on the current runtime and
/// forward each read as a [`CaptureEvent`].
///
/// The task owns the read buffer. It ends when its receiver goes away or
/// when aborted through the returned handle.
pub fn spawn_capture_reader(
    if_index: u32,
    socket: Arc<dyn LinkSocket>,
    buffer_size: usize,
    tx: mpsc::UnboundedSender<CaptureEvent>,
) -> io::Result<AbortHandle> {
    let watched = AsyncFd::with_interest(Watched(socket), Interest::READABLE)?;

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; buffer_size];
        loop {
            let mut guard = match watched.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("capture poll on interface {}: {}", if_index, e);
                    return;
                }
            };
            match guard.try_io(|inner| inner.get_ref().0.read(&mut buf)) {
                Ok(Ok(0)) => guard.clear_ready(),
                Ok(Ok(n)) => {
                    debug!("bpf_receive: {} bytes on interface {}", n, if_index);
                    let event = CaptureEvent {
                        if_index,
                        data: buf[..n].to_vec(),
                    };
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                Ok(Err(e)) => {
                    warn!("read: {}", e);
                    guard.clear_ready();
                }
                Err(_would_block) => continue,
            }
        }
    });

    Ok(task.abort_handle())
}

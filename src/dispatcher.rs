//! IPC dispatcher
//!
//! Owns the frontend state and applies messages from the main and engine
//! processes to it. Descriptors that need readiness monitoring are handed
//! back to the reactor as [`Arming`] requests; the dispatcher itself never
//! waits on anything.

use crate::control::ControlRelay;
use crate::error::{FrontendError, FrontendResult};
use crate::gateway::{self, CaptureEvent, Gateway};
use crate::handle::{CaptureHandle, FdSocket, LinkSocket};
use crate::imsg::{Imsg, ImsgBuf};
use crate::kernel::KernelQuery;
use crate::message::{
    FixedPayload, ImsgIfIndex, ImsgReqDiscover, ImsgReqRequest, ImsgType, ToEngine, ToMain,
    Upstream,
};
use crate::registry::InterfaceRegistry;
use crate::route_monitor;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

/// A descriptor the reactor should start watching
pub enum Arming {
    /// Channel to the engine process
    EngineChannel(OwnedFd),
    /// Routing socket, armed at startup
    RouteSocket(OwnedFd),
    /// Capture handle just installed on an interface
    Capture {
        if_index: u32,
        socket: Arc<dyn LinkSocket>,
    },
}

impl std::fmt::Debug for Arming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arming::EngineChannel(fd) => f.debug_tuple("EngineChannel").field(fd).finish(),
            Arming::RouteSocket(fd) => f.debug_tuple("RouteSocket").field(fd).finish(),
            Arming::Capture { if_index, .. } => {
                f.debug_struct("Capture").field("if_index", if_index).finish()
            }
        }
    }
}

/// Outbound buffers of both channels
pub struct Channels {
    pub main: ImsgBuf,
    pub engine: Option<ImsgBuf>,
}

impl Upstream for Channels {
    fn to_main(&mut self, msg: ToMain) {
        let composed = msg
            .encode()
            .and_then(|(kind, data)| self.main.compose(kind, 0, None, &data));
        if let Err(e) = composed {
            error!("compose to main: {}", e);
        }
    }

    fn to_engine(&mut self, msg: ToEngine) {
        let Some(engine) = self.engine.as_mut() else {
            debug!("no engine channel, dropping message");
            return;
        };
        let composed = msg
            .encode()
            .and_then(|(kind, data)| engine.compose(kind, 0, None, &data));
        if let Err(e) = composed {
            error!("compose to engine: {}", e);
        }
    }
}

pub struct Dispatcher {
    registry: InterfaceRegistry,
    kernel: Box<dyn KernelQuery>,
    gateway: Gateway,
    control: Box<dyn ControlRelay>,
    channels: Channels,
    /// Received but not yet armed
    route_socket: Option<OwnedFd>,
    started: bool,
    arming: Vec<Arming>,
}

impl Dispatcher {
    pub fn new(
        kernel: Box<dyn KernelQuery>,
        gateway: Gateway,
        control: Box<dyn ControlRelay>,
    ) -> Self {
        Self {
            registry: InterfaceRegistry::new(),
            kernel,
            gateway,
            control,
            channels: Channels {
                main: ImsgBuf::new(),
                engine: None,
            },
            route_socket: None,
            started: false,
            arming: Vec::new(),
        }
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    pub fn main_channel(&mut self) -> &mut ImsgBuf {
        &mut self.channels.main
    }

    pub fn engine_channel(&mut self) -> Option<&mut ImsgBuf> {
        self.channels.engine.as_mut()
    }

    /// Descriptors to start watching, in the order they were received
    pub fn take_arming(&mut self) -> Vec<Arming> {
        std::mem::take(&mut self.arming)
    }

    /// Dispatch every complete message buffered from main.
    pub fn process_main(&mut self) -> FrontendResult<()> {
        while let Some(imsg) = self.channels.main.get()? {
            self.dispatch_main(imsg)?;
        }
        Ok(())
    }

    /// Dispatch every complete message buffered from the engine.
    pub fn process_engine(&mut self) -> FrontendResult<()> {
        loop {
            let Some(engine) = self.channels.engine.as_mut() else {
                return Ok(());
            };
            let Some(imsg) = engine.get()? else {
                return Ok(());
            };
            self.dispatch_engine(imsg)?;
        }
    }

    pub fn dispatch_main(&mut self, mut imsg: Imsg) -> FrontendResult<()> {
        match imsg.tag() {
            Some(ImsgType::SocketIpc) => {
                if self.channels.engine.is_some() {
                    return Err(FrontendError::Protocol(
                        "received unexpected imsg fd to frontend".to_string(),
                    ));
                }
                let fd = imsg.take_fd("IMSG_SOCKET_IPC")?;
                self.channels.engine = Some(ImsgBuf::new());
                self.arming.push(Arming::EngineChannel(fd));
            }
            Some(ImsgType::Bpfsock) => {
                let fd = imsg.take_fd("IMSG_BPFSOCK")?;
                let if_index = ImsgIfIndex::decode(&imsg.data)?.if_index;
                self.set_bpfsock(if_index, fd)?;
            }
            Some(ImsgType::Udpsock) => {
                let fd = imsg.take_fd("IMSG_UDPSOCK")?;
                let if_index = ImsgIfIndex::decode(&imsg.data)?.if_index;
                let Some(iface) = self.registry.lookup_mut(if_index) else {
                    debug!("udp socket for unknown interface {}", if_index);
                    return Ok(());
                };
                if iface.has_transmit() {
                    return Err(FrontendError::Protocol(
                        "received unexpected udpsocket".to_string(),
                    ));
                }
                iface.set_transmit(Box::new(FdSocket::new(fd)?));
            }
            Some(ImsgType::CloseUdpsock) => {
                let if_index = ImsgIfIndex::decode(&imsg.data)?.if_index;
                if let Some(iface) = self.registry.lookup_mut(if_index) {
                    iface.close_transmit();
                }
            }
            Some(ImsgType::Routesock) => {
                let fd = imsg.take_fd("IMSG_ROUTESOCK")?;
                if self.started {
                    self.arming.push(Arming::RouteSocket(fd));
                } else {
                    self.route_socket = Some(fd);
                }
            }
            Some(ImsgType::Startup) => {
                imsg.expect_empty("IMSG_STARTUP")?;
                self.startup()?;
            }
            Some(ImsgType::Controlfd) => {
                let fd = imsg.take_fd("IMSG_CONTROLFD")?;
                self.control.listen(fd)?;
            }
            Some(ImsgType::CtlEnd) => self.control.relay(&imsg),
            _ => debug!("dispatch_main: error handling imsg {}", imsg.kind),
        }
        Ok(())
    }

    pub fn dispatch_engine(&mut self, imsg: Imsg) -> FrontendResult<()> {
        match imsg.tag() {
            Some(ImsgType::CtlEnd) | Some(ImsgType::CtlShowInterfaceInfo) => {
                self.control.relay(&imsg)
            }
            Some(ImsgType::SendDiscover) => {
                let req = ImsgReqDiscover::decode(&imsg.data)?;
                if let Some(iface) = self.registry.lookup_mut(req.if_index) {
                    self.gateway.send_discover(iface, req.xid);
                }
            }
            Some(ImsgType::SendRequest) => {
                let req = ImsgReqRequest::decode(&imsg.data)?;
                if let Some(iface) = self.registry.lookup_mut(req.if_index) {
                    self.gateway.send_request(iface, &req);
                }
            }
            _ => debug!("dispatch_engine: error handling imsg {}", imsg.kind),
        }
        Ok(())
    }

    /// Arm the routing socket and refresh every current interface.
    fn startup(&mut self) -> FrontendResult<()> {
        match self.route_socket.take() {
            Some(fd) => self.arming.push(Arming::RouteSocket(fd)),
            None if self.started => {}
            None => {
                return Err(FrontendError::Protocol(
                    "did not receive a route socket from the main process".to_string(),
                ))
            }
        }
        self.started = true;
        info!("startup");

        route_monitor::refresh_all(&mut self.registry, self.kernel.as_ref(), &mut self.channels)
    }

    fn set_bpfsock(&mut self, if_index: u32, fd: OwnedFd) -> FrontendResult<()> {
        debug!("set_bpfsock: {}", if_index);
        let Some(iface) = self.registry.lookup_mut(if_index) else {
            // interface went away while main opened the socket
            return Ok(());
        };
        let socket: Arc<dyn LinkSocket> = Arc::new(FdSocket::new(fd)?);
        self.gateway
            .grant_capture_handle(iface, CaptureHandle::new(socket.clone()));
        self.arming.push(Arming::Capture { if_index, socket });
        Ok(())
    }

    /// Attach the reader task now watching an interface's capture handle.
    ///
    /// Returns false if the handle is gone, in which case the task is
    /// aborted.
    pub fn set_capture_monitor(&mut self, if_index: u32, monitor: AbortHandle) -> bool {
        match self
            .registry
            .lookup_mut(if_index)
            .and_then(|iface| iface.capture_mut())
        {
            Some(capture) => {
                capture.set_monitor(monitor);
                true
            }
            None => {
                monitor.abort();
                false
            }
        }
    }

    pub fn handle_route(&mut self, buf: &[u8]) -> FrontendResult<()> {
        route_monitor::handle_route_read(
            buf,
            &mut self.registry,
            self.kernel.as_ref(),
            &mut self.channels,
        )
    }

    pub fn handle_capture(&mut self, event: &CaptureEvent) {
        gateway::on_capture_readable(event, &self.registry, &mut self.channels);
    }

    /// Release every interface handle.
    pub fn shutdown(&mut self) {
        self.registry.clear();
    }
}

//! Frontend reactor
//!
//! Single-threaded event loop multiplexing the main and engine channels,
//! the routing socket and the capture readers. Every wake-up is turned into
//! a [`Wake`] and handed to the [`Dispatcher`], which owns all state.

use crate::dispatcher::{Arming, Dispatcher};
use crate::error::{FrontendError, FrontendResult};
use crate::gateway::{spawn_capture_reader, CaptureEvent};
use crate::handle::{set_nonblocking, FdSocket, LinkSocket};
use crate::imsg::ImsgBuf;
use futures::future::OptionFuture;
use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reactor tuning
#[derive(Debug, Clone, Copy)]
pub struct FrontendOptions {
    /// Per-interface capture read buffer
    pub capture_buffer_size: usize,
    /// Routing socket read buffer
    pub route_buffer_size: usize,
}

/// What woke the reactor
#[derive(Debug)]
pub enum Wake {
    MainReadable,
    MainWritable,
    EngineReadable,
    EngineWritable,
    RouteReadable,
    Capture(CaptureEvent),
    Shutdown,
}

pub struct Frontend {
    dispatcher: Dispatcher,
    main: AsyncFd<OwnedFd>,
    engine: Option<AsyncFd<OwnedFd>>,
    route: Option<AsyncFd<FdSocket>>,
    capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    route_buf: Vec<u8>,
    options: FrontendOptions,
}

impl Frontend {
    /// Wrap the channel to the main process. Must be called from within a
    /// tokio runtime.
    pub fn new(
        dispatcher: Dispatcher,
        main_fd: OwnedFd,
        options: FrontendOptions,
    ) -> io::Result<Self> {
        set_nonblocking(&main_fd)?;
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        Ok(Self {
            dispatcher,
            main: AsyncFd::new(main_fd)?,
            engine: None,
            route: None,
            capture_tx,
            capture_rx,
            route_buf: vec![0u8; options.route_buffer_size],
            options,
        })
    }

    /// Run until `shutdown` resolves or a sibling closes its channel, then
    /// flush and close both channels. Fatal errors return immediately.
    pub async fn run<F>(mut self, shutdown: F) -> FrontendResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("frontend started");

        loop {
            let wake = self.next_wake(shutdown.as_mut()).await?;
            if let Wake::Shutdown = wake {
                break;
            }
            match self.handle(wake) {
                Ok(()) => {}
                Err(FrontendError::ChannelClosed(who)) => {
                    info!("{} channel closed", who);
                    break;
                }
                Err(e) => {
                    error!("{}", e);
                    return Err(e);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn next_wake(
        &mut self,
        shutdown: std::pin::Pin<&mut impl Future<Output = ()>>,
    ) -> io::Result<Wake> {
        let main_pending = self.dispatcher.main_channel().has_pending();
        let engine_pending = self
            .dispatcher
            .engine_channel()
            .is_some_and(|c| c.has_pending());

        let main_writable: OptionFuture<_> =
            main_pending.then(|| self.main.writable()).into();
        let engine_readable: OptionFuture<_> =
            self.engine.as_ref().map(|fd| fd.readable()).into();
        let engine_writable: OptionFuture<_> = self
            .engine
            .as_ref()
            .filter(|_| engine_pending)
            .map(|fd| fd.writable())
            .into();
        let route_readable: OptionFuture<_> =
            self.route.as_ref().map(|fd| fd.readable()).into();

        // Readiness is cleared up front; handlers then run until the
        // descriptor would block, so no edge is lost.
        tokio::select! {
            biased;
            _ = shutdown => Ok(Wake::Shutdown),
            guard = self.main.readable() => {
                guard?.clear_ready();
                Ok(Wake::MainReadable)
            }
            Some(guard) = main_writable => {
                guard?.clear_ready();
                Ok(Wake::MainWritable)
            }
            Some(guard) = engine_readable => {
                guard?.clear_ready();
                Ok(Wake::EngineReadable)
            }
            Some(guard) = engine_writable => {
                guard?.clear_ready();
                Ok(Wake::EngineWritable)
            }
            Some(guard) = route_readable => {
                guard?.clear_ready();
                Ok(Wake::RouteReadable)
            }
            Some(event) = self.capture_rx.recv() => Ok(Wake::Capture(event)),
        }
    }

    fn handle(&mut self, wake: Wake) -> FrontendResult<()> {
        match wake {
            Wake::MainReadable => {
                let open = read_channel(self.dispatcher.main_channel(), &self.main)?;
                self.dispatcher.process_main()?;
                if !open {
                    return Err(FrontendError::ChannelClosed("main"));
                }
            }
            Wake::MainWritable => {
                self.dispatcher
                    .main_channel()
                    .flush_to(self.main.as_raw_fd())?;
            }
            Wake::EngineReadable => {
                let (Some(fd), Some(channel)) =
                    (self.engine.as_ref(), self.dispatcher.engine_channel())
                else {
                    return Ok(());
                };
                let open = read_channel(channel, fd)?;
                self.dispatcher.process_engine()?;
                if !open {
                    return Err(FrontendError::ChannelClosed("engine"));
                }
            }
            Wake::EngineWritable => {
                if let (Some(fd), Some(channel)) =
                    (self.engine.as_ref(), self.dispatcher.engine_channel())
                {
                    channel.flush_to(fd.as_raw_fd())?;
                }
            }
            Wake::RouteReadable => self.route_receive()?,
            Wake::Capture(event) => self.dispatcher.handle_capture(&event),
            Wake::Shutdown => {}
        }
        self.arm()
    }

    fn route_receive(&mut self) -> FrontendResult<()> {
        let Some(route) = self.route.as_ref() else {
            return Ok(());
        };
        loop {
            match route.get_ref().read(&mut self.route_buf) {
                Ok(0) => {
                    return Err(FrontendError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "routing socket closed",
                    )))
                }
                Ok(n) => self.dispatcher.handle_route(&self.route_buf[..n])?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("dispatch_rtmsg: read error: {}", e);
                    return Ok(());
                }
            }
        }
    }

    /// Start watching descriptors the dispatcher just took in.
    fn arm(&mut self) -> FrontendResult<()> {
        for arming in self.dispatcher.take_arming() {
            match arming {
                Arming::EngineChannel(fd) => {
                    set_nonblocking(&fd)?;
                    self.engine = Some(AsyncFd::new(fd)?);
                    debug!("engine channel armed");
                }
                Arming::RouteSocket(fd) => {
                    self.route = Some(AsyncFd::new(FdSocket::new(fd)?)?);
                    debug!("routing socket armed");
                }
                Arming::Capture { if_index, socket } => {
                    match spawn_capture_reader(
                        if_index,
                        socket,
                        self.options.capture_buffer_size,
                        self.capture_tx.clone(),
                    ) {
                        Ok(monitor) => {
                            self.dispatcher.set_capture_monitor(if_index, monitor);
                        }
                        Err(e) => warn!("cannot watch capture handle on {}: {}", if_index, e),
                    }
                }
            }
        }
        Ok(())
    }

    /// Flush and close the engine channel, then the main channel.
    async fn shutdown(mut self) {
        if let (Some(fd), Some(channel)) = (self.engine.take(), self.dispatcher.engine_channel()) {
            flush_channel(channel, &fd, "engine").await;
        }
        flush_channel(self.dispatcher.main_channel(), &self.main, "main").await;
        self.dispatcher.shutdown();
        info!("frontend exiting");
    }
}

/// Read until the channel would block. Returns false once the peer has
/// closed it.
fn read_channel(channel: &mut ImsgBuf, fd: &AsyncFd<OwnedFd>) -> FrontendResult<bool> {
    loop {
        match channel.read_from(fd.as_raw_fd()) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

async fn flush_channel(channel: &mut ImsgBuf, fd: &AsyncFd<OwnedFd>, who: &str) {
    loop {
        if let Err(e) = channel.flush_to(fd.as_raw_fd()) {
            warn!("flushing {} channel: {}", who, e);
            return;
        }
        if !channel.has_pending() {
            return;
        }
        match fd.writable().await {
            Ok(mut guard) => guard.clear_ready(),
            Err(e) => {
                warn!("flushing {} channel: {}", who, e);
                return;
            }
        }
    }
}

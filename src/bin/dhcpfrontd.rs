//! DHCP client frontend daemon (dhcpfrontd)
//!
//! The unprivileged, network-facing half of a privilege-separated DHCP
//! client. It is started by the main process with one end of the main
//! channel already open on a known descriptor.
//!
//! # Usage
//!
//! ```bash
//! # Main channel inherited on fd 3
//! dhcpfrontd
//!
//! # Check the configuration file and exit
//! dhcpfrontd -n -c /etc/dhcpfront.toml
//! ```

use anyhow::Context;
use clap::Parser;
use libdhcpfront::config::default_config_path;
use libdhcpfront::{
    DisabledControl, Dispatcher, Frontend, FrontendConfig, FrontendOptions, Gateway,
    PacketBuilder, SystemKernel,
};
use nix::fcntl::{fcntl, FcntlArg};
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// DHCP client frontend daemon
#[derive(Parser, Debug)]
#[command(name = "dhcpfrontd")]
#[command(author = "CRRouter Team")]
#[command(version)]
#[command(about = "DHCP client frontend - captures and sends DHCP messages on behalf of the engine", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Descriptor of the main channel (overrides ipc.main_fd)
    #[arg(long)]
    ipc_fd: Option<RawFd>,

    /// Only check the configuration file
    #[arg(short = 'n', long)]
    check_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = FrontendConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if args.check_config {
        println!("configuration OK");
        return Ok(());
    }

    info!("Starting DHCP client frontend (dhcpfrontd)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let main_fd = inherit_fd(args.ipc_fd.unwrap_or(config.ipc.main_fd))?;
    let signals = Signals::register()?;

    let kernel = SystemKernel::new(config.interfaces.autoconf.clone())
        .context("Failed to open interface query socket")?;
    let gateway = Gateway::new(PacketBuilder::new(config.hostname_source()));
    let dispatcher = Dispatcher::new(Box::new(kernel), gateway, Box::new(DisabledControl));

    let options = FrontendOptions {
        capture_buffer_size: config.capture.buffer_size,
        route_buffer_size: config.capture.route_buffer_size,
    };
    let frontend =
        Frontend::new(dispatcher, main_fd, options).context("Failed to register main channel")?;

    frontend
        .run(signals.wait())
        .await
        .context("Frontend stopped on a fatal error")?;

    info!("dhcpfrontd stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(args: &Args) {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dhcpfrontd={},libdhcpfront={}",
            log_level, log_level
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_writer(io::stderr)
        .init();
}

/// Take ownership of a descriptor inherited from the main process
fn inherit_fd(fd: RawFd) -> anyhow::Result<OwnedFd> {
    if fd < 0 {
        anyhow::bail!("Invalid main channel descriptor {}", fd);
    }
    fcntl(fd, FcntlArg::F_GETFD)
        .with_context(|| format!("Main channel descriptor {} is not open", fd))?;
    // SAFETY: the descriptor is open and nothing else in this process owns it
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Unix signals that end or are ignored by the daemon
struct Signals {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl Signals {
    fn register() -> anyhow::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
        })
    }

    /// Resolve on SIGTERM or SIGINT
    async fn wait(mut self) {
        loop {
            tokio::select! {
                _ = self.sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    return;
                }
                _ = self.sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                    return;
                }
                _ = self.sighup.recv() => {
                    debug!("Received SIGHUP, ignored");
                }
            }
        }
    }
}

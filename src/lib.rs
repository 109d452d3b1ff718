//! dhcpfront - unprivileged DHCP client frontend
//!
//! The network-facing process of a privilege-separated DHCP client:
//! - Raw link-layer capture and transmission of DHCP messages
//! - Routing socket monitoring of interface and address changes
//! - DHCP client message construction
//! - Framed IPC with the privileged main process and the protocol engine
//!
//! All state lives on a single-threaded reactor; see [`frontend::Frontend`].

pub mod error;
pub mod validation;
pub mod config;
pub mod wire;
pub mod kernel;
pub mod handle;
pub mod registry;
pub mod message;
pub mod imsg;
pub mod route_monitor;
pub mod gateway;
pub mod control;
pub mod dispatcher;
pub mod frontend;

// Re-export commonly used types
pub use error::{FrontendError, FrontendResult};
pub use config::FrontendConfig;
pub use control::{ControlRelay, DisabledControl};
pub use dispatcher::Dispatcher;
pub use frontend::{Frontend, FrontendOptions, Wake};
pub use gateway::Gateway;
pub use kernel::{KernelQuery, SystemKernel};
pub use message::{ImsgType, ToEngine, ToMain};
pub use registry::{Interface, InterfaceRegistry};
pub use wire::dhcp::HostnameSource;
pub use wire::PacketBuilder;

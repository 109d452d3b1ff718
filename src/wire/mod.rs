//! Wire codec
//!
//! Pure byte-layout encoders and decoders for everything the frontend puts
//! on or takes off the wire: DHCP client messages, captured link-layer
//! records, routing socket messages and the Ethernet/IPv4/UDP framing used
//! for raw transmission. Nothing in here performs I/O.

pub mod bpf;
pub mod dhcp;
pub mod frame;
pub mod route;

pub use bpf::CapturedFrames;
pub use dhcp::{DhcpMessageType, PacketBuilder};
pub use frame::{checksum, wrapsum, FrameHeaders};
pub use route::{decode_route_addrs, RouteAddrs, RouteMessage, RouteMessageKind};

/// Ethernet hardware address
pub type MacAddr = [u8; 6];

//! IPC message catalog
//!
//! Message tags exchanged with the main and engine processes, the
//! fixed-size payload record carried by each, and the typed upstream
//! events the frontend components emit.

use crate::error::{FrontendError, FrontendResult};
use crate::kernel::LinkState;
use crate::wire::bpf::CAPTURE_PAYLOAD_MAX;
use crate::wire::MacAddr;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Message tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ImsgType {
    None = 0,
    CtlEnd = 1,
    CtlShowInterfaceInfo = 2,
    SocketIpc = 3,
    Bpfsock = 4,
    Udpsock = 5,
    CloseUdpsock = 6,
    Routesock = 7,
    Controlfd = 8,
    Startup = 9,
    UpdateIf = 10,
    RemoveIf = 11,
    Dhcp = 12,
    ReproposeRdns = 13,
    OpenBpfsock = 14,
    SendDiscover = 15,
    SendRequest = 16,
}

impl ImsgType {
    pub fn from_u32(value: u32) -> Option<Self> {
        use ImsgType::*;
        Some(match value {
            0 => None,
            1 => CtlEnd,
            2 => CtlShowInterfaceInfo,
            3 => SocketIpc,
            4 => Bpfsock,
            5 => Udpsock,
            6 => CloseUdpsock,
            7 => Routesock,
            8 => Controlfd,
            9 => Startup,
            10 => UpdateIf,
            11 => RemoveIf,
            12 => Dhcp,
            13 => ReproposeRdns,
            14 => OpenBpfsock,
            15 => SendDiscover,
            16 => SendRequest,
            _ => return Option::None,
        })
    }
}

/// A payload record with one fixed encoded size
pub trait FixedPayload: Serialize + DeserializeOwned {
    const WIRE_SIZE: usize;
    const NAME: &'static str;

    fn encode(&self) -> FrontendResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode `data`, treating any size mismatch as a protocol violation.
    fn decode(data: &[u8]) -> FrontendResult<Self> {
        if data.len() != Self::WIRE_SIZE {
            return Err(FrontendError::Protocol(format!(
                "{} wrong length: {}",
                Self::NAME,
                data.len()
            )));
        }
        Ok(bincode::deserialize(data)?)
    }
}

/// Interface index alone (BPFSOCK, UDPSOCK, CLOSE_UDPSOCK, OPEN_BPFSOCK,
/// REMOVE_IF)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImsgIfIndex {
    pub if_index: u32,
}

impl FixedPayload for ImsgIfIndex {
    const WIRE_SIZE: usize = 4;
    const NAME: &'static str = "IMSG_IFINDEX";
}

/// SEND_DISCOVER
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImsgReqDiscover {
    pub if_index: u32,
    pub xid: u32,
}

impl FixedPayload for ImsgReqDiscover {
    const WIRE_SIZE: usize = 8;
    const NAME: &'static str = "IMSG_SEND_DISCOVER";
}

/// SEND_REQUEST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImsgReqRequest {
    pub if_index: u32,
    pub xid: u32,
    pub requested_ip: Ipv4Addr,
    pub server_identifier: Ipv4Addr,
    pub dhcp_server: Ipv4Addr,
}

impl FixedPayload for ImsgReqRequest {
    const WIRE_SIZE: usize = 20;
    const NAME: &'static str = "IMSG_SEND_REQUEST";
}

/// UPDATE_IF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImsgIfInfo {
    pub if_index: u32,
    pub rdomain: i32,
    pub running: bool,
    pub link_state: LinkState,
    pub hw_address: MacAddr,
}

impl FixedPayload for ImsgIfInfo {
    const WIRE_SIZE: usize = 19;
    const NAME: &'static str = "IMSG_UPDATE_IF";
}

/// DHCP: a captured frame, zero-padded to the record capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImsgDhcp {
    pub if_index: u32,
    pub len: u32,
    packet: Vec<u8>,
}

impl ImsgDhcp {
    /// Returns `None` if `payload` exceeds the record capacity.
    pub fn new(if_index: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > CAPTURE_PAYLOAD_MAX {
            return None;
        }
        let mut packet = vec![0u8; CAPTURE_PAYLOAD_MAX];
        packet[..payload.len()].copy_from_slice(payload);
        Some(Self {
            if_index,
            len: payload.len() as u32,
            packet,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.packet[..(self.len as usize).min(self.packet.len())]
    }
}

impl FixedPayload for ImsgDhcp {
    const WIRE_SIZE: usize = 4 + 4 + 8 + CAPTURE_PAYLOAD_MAX;
    const NAME: &'static str = "IMSG_DHCP";
}

/// Messages the frontend sends to the main process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToMain {
    /// Ask for a capture handle
    OpenBpfsock { if_index: u32 },
    /// Report interface state
    UpdateIf(ImsgIfInfo),
}

/// Messages the frontend sends to the engine process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToEngine {
    /// Interface is gone or no longer eligible
    RemoveIf { if_index: u32 },
    /// Captured DHCP message
    Dhcp(ImsgDhcp),
    /// Re-announce resolver proposals
    ReproposeRdns,
}

impl ToMain {
    pub fn encode(&self) -> FrontendResult<(ImsgType, Vec<u8>)> {
        Ok(match self {
            ToMain::OpenBpfsock { if_index } => (
                ImsgType::OpenBpfsock,
                ImsgIfIndex { if_index: *if_index }.encode()?,
            ),
            ToMain::UpdateIf(info) => (ImsgType::UpdateIf, info.encode()?),
        })
    }
}

impl ToEngine {
    pub fn encode(&self) -> FrontendResult<(ImsgType, Vec<u8>)> {
        Ok(match self {
            ToEngine::RemoveIf { if_index } => (
                ImsgType::RemoveIf,
                ImsgIfIndex { if_index: *if_index }.encode()?,
            ),
            ToEngine::Dhcp(dhcp) => (ImsgType::Dhcp, dhcp.encode()?),
            ToEngine::ReproposeRdns => (ImsgType::ReproposeRdns, Vec::new()),
        })
    }
}

/// Sink for messages travelling up to the sibling processes
pub trait Upstream {
    fn to_main(&mut self, msg: ToMain);
    fn to_engine(&mut self, msg: ToEngine);
}

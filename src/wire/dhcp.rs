//! DHCP client message construction - RFC 2131, 2132

use super::MacAddr;
use std::net::Ipv4Addr;
use std::os::unix::ffi::OsStrExt;
use tracing::debug;

/// Size of the scratch buffer a message is built into
pub const DHCP_PACKET_SIZE: usize = 1500;

/// Fixed BOOTP header size (before the magic cookie)
pub const DHCP_HEADER_SIZE: usize = 236;

/// Magic cookie marking start of options
pub const DHCP_COOKIE: [u8; 4] = [99, 130, 83, 99];

const DHCP_BOOTREQUEST: u8 = 1;
const HTYPE_ETHER: u8 = 1;
const ETHER_ADDR_LEN: u8 = 6;

/// Longest value an option length byte can declare
const MAX_OPTION_LEN: usize = 255;

/// DHCP option codes
pub mod options {
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTERS: u8 = 3;
    pub const DOMAIN_NAME_SERVERS: u8 = 6;
    pub const HOST_NAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const REQUESTED_ADDRESS: u8 = 50;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const CLIENT_IDENTIFIER: u8 = 61;
    pub const DOMAIN_SEARCH: u8 = 119;
    pub const CLASSLESS_STATIC_ROUTES: u8 = 121;
    pub const END: u8 = 255;
}

/// Parameters asked of every server, in request order
pub const PARAMETER_REQUEST_LIST: [u8; 8] = [
    options::SUBNET_MASK,
    options::ROUTERS,
    options::DOMAIN_NAME_SERVERS,
    options::HOST_NAME,
    options::DOMAIN_NAME,
    options::BROADCAST_ADDRESS,
    options::DOMAIN_SEARCH,
    options::CLASSLESS_STATIC_ROUTES,
];

/// Client message types (Option 53) the frontend sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Request = 3,
}

/// Where the host-name option value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostnameSource {
    /// Ask the system on every build
    System,
    /// Fixed value from configuration
    Fixed(String),
    /// Never send the option
    Disabled,
}

impl HostnameSource {
    /// Short host name (up to the first dot), capped to one option's worth.
    fn lookup(&self) -> Option<Vec<u8>> {
        let full = match self {
            HostnameSource::System => match nix::unistd::gethostname() {
                Ok(name) => name.as_bytes().to_vec(),
                Err(e) => {
                    debug!("gethostname: {}", e);
                    return None;
                }
            },
            HostnameSource::Fixed(name) => name.as_bytes().to_vec(),
            HostnameSource::Disabled => return None,
        };

        let short = full.split(|&b| b == b'.').next().unwrap_or_default();
        let short = &short[..short.len().min(MAX_OPTION_LEN)];
        if short.is_empty() {
            None
        } else {
            Some(short.to_vec())
        }
    }
}

/// Builds DHCP client messages into an owned scratch buffer.
///
/// The buffer is zeroed before every build, so a short message never
/// carries bytes of a longer one built earlier.
pub struct PacketBuilder {
    buf: Box<[u8; DHCP_PACKET_SIZE]>,
    hostname: HostnameSource,
}

impl PacketBuilder {
    pub fn new(hostname: HostnameSource) -> Self {
        Self {
            buf: Box::new([0u8; DHCP_PACKET_SIZE]),
            hostname,
        }
    }

    /// Build a message and return the bytes written.
    ///
    /// `requested_ip` and `server_identifier` only matter for
    /// [`DhcpMessageType::Request`]; an unspecified server identifier omits
    /// that option.
    pub fn build(
        &mut self,
        message_type: DhcpMessageType,
        xid: u32,
        hw_address: &MacAddr,
        requested_ip: Ipv4Addr,
        server_identifier: Ipv4Addr,
    ) -> &[u8] {
        let hostname = self.hostname.lookup();
        let buf = &mut self.buf[..];
        buf.fill(0);

        buf[0] = DHCP_BOOTREQUEST;
        buf[1] = HTYPE_ETHER;
        buf[2] = ETHER_ADDR_LEN;
        // hops, secs and flags stay zero
        buf[4..8].copy_from_slice(&xid.to_be_bytes());
        buf[28..34].copy_from_slice(hw_address);

        let mut w = OptionWriter {
            buf,
            pos: DHCP_HEADER_SIZE,
        };
        w.raw(&DHCP_COOKIE);
        w.option(options::MESSAGE_TYPE, &[message_type as u8]);
        if let Some(name) = hostname {
            w.option(options::HOST_NAME, &name);
        }
        let mut client_id = [0u8; 7];
        client_id[0] = HTYPE_ETHER;
        client_id[1..].copy_from_slice(hw_address);
        w.option(options::CLIENT_IDENTIFIER, &client_id);
        w.option(options::PARAMETER_REQUEST_LIST, &PARAMETER_REQUEST_LIST);

        if message_type == DhcpMessageType::Request {
            w.option(options::REQUESTED_ADDRESS, &requested_ip.octets());
            if !server_identifier.is_unspecified() {
                w.option(options::SERVER_IDENTIFIER, &server_identifier.octets());
            }
        }
        w.raw(&[options::END]);

        let len = w.pos;
        &self.buf[..len]
    }
}

struct OptionWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl OptionWriter<'_> {
    fn raw(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn option(&mut self, code: u8, value: &[u8]) {
        debug_assert!(value.len() <= MAX_OPTION_LEN);
        self.raw(&[code, value.len() as u8]);
        self.raw(value);
    }
}

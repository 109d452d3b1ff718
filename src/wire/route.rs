//! Routing socket message decoding
//!
//! Only the header prefix shared by route, interface and address messages
//! is decoded:
//!
//! ```text
//! 0        2     3     4         6        8         10   11   12       16
//! +--------+-----+-----+---------+--------+---------+----+----+--------+
//! | msglen | ver | type| hdrlen  | index  | tableid |prio|mpls| addrs  |
//! +--------+-----+-----+---------+--------+---------+----+----+--------+
//! ```
//!
//! The socket addresses selected by `addrs` follow at `hdrlen`.

use crate::error::{FrontendError, FrontendResult};

/// Routing message protocol version understood here
pub const RTM_VERSION: u8 = 5;

pub const RTM_NEWADDR: u8 = 0xc;
pub const RTM_IFINFO: u8 = 0xe;
pub const RTM_PROPOSAL: u8 = 0x13;

/// Priority marking a proposal solicitation
pub const RTP_PROPOSAL_SOLICIT: u8 = 62;

/// Number of socket address roles in a routing message
pub const RTAX_MAX: usize = 15;

/// Bytes of the common header prefix that must be present
pub const RT_MSG_PREFIX_LEN: usize = 16;

const SOCKADDR_ALIGN: usize = std::mem::size_of::<libc::c_long>();

/// Socket addresses of a message, indexed by role. Absent roles are `None`.
pub type RouteAddrs<'a> = [Option<&'a [u8]>; RTAX_MAX];

fn roundup(len: usize) -> usize {
    if len > 0 {
        1 + ((len - 1) | (SOCKADDR_ALIGN - 1))
    } else {
        SOCKADDR_ALIGN
    }
}

/// Walk a socket address block, assigning each address selected by `addrs`
/// to its role. Each address starts with its own length byte and the next
/// one begins at that length rounded up to the platform word size.
///
/// An address that would run past the end of `block` ends the walk; it and
/// all later roles stay `None`.
pub fn decode_route_addrs(addrs: i32, block: &[u8]) -> RouteAddrs<'_> {
    let mut table: RouteAddrs<'_> = [None; RTAX_MAX];
    let mut rest = block;

    for (i, slot) in table.iter_mut().enumerate() {
        if addrs & (1 << i) == 0 {
            continue;
        }
        let Some(&sa_len) = rest.first() else {
            break;
        };
        let sa_len = sa_len as usize;
        if sa_len > rest.len() {
            break;
        }
        *slot = Some(&rest[..sa_len]);
        rest = rest.get(roundup(sa_len)..).unwrap_or_default();
    }

    table
}

/// Kind of routing message, as far as the frontend cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMessageKind {
    /// Interface state changed
    IfInfo,
    /// Address added to an interface
    NewAddr,
    /// Route proposal; carries the proposal priority
    Proposal(u8),
    /// Anything else
    Other(u8),
}

/// A decoded routing message borrowing the read buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMessage<'a> {
    pub kind: RouteMessageKind,
    pub index: u16,
    pub addrs: RouteAddrs<'a>,
}

impl<'a> RouteMessage<'a> {
    /// Decode one message from a routing socket read.
    ///
    /// Returns `Ok(None)` for messages of another protocol version, which
    /// are silently ignored. A read that does not hold the whole message is
    /// a parse error.
    pub fn parse(buf: &'a [u8]) -> FrontendResult<Option<Self>> {
        if buf.len() < 2 {
            return Err(FrontendError::ParseError(format!(
                "partial rtm of {} in buffer",
                buf.len()
            )));
        }
        let msglen = u16::from_ne_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < msglen {
            return Err(FrontendError::ParseError(format!(
                "partial rtm of {} in buffer",
                buf.len()
            )));
        }
        if msglen < RT_MSG_PREFIX_LEN {
            return Err(FrontendError::ParseError(format!(
                "rtm too short: {}",
                msglen
            )));
        }

        let msg = &buf[..msglen];
        if msg[2] != RTM_VERSION {
            return Ok(None);
        }

        let hdrlen = u16::from_ne_bytes([msg[4], msg[5]]) as usize;
        if hdrlen < RT_MSG_PREFIX_LEN || hdrlen > msglen {
            return Err(FrontendError::ParseError(format!(
                "rtm header length {} out of range",
                hdrlen
            )));
        }

        let index = u16::from_ne_bytes([msg[6], msg[7]]);
        let priority = msg[10];
        let addrs = i32::from_ne_bytes([msg[12], msg[13], msg[14], msg[15]]);

        let kind = match msg[3] {
            RTM_IFINFO => RouteMessageKind::IfInfo,
            RTM_NEWADDR => RouteMessageKind::NewAddr,
            RTM_PROPOSAL => RouteMessageKind::Proposal(priority),
            other => RouteMessageKind::Other(other),
        };

        Ok(Some(Self {
            kind,
            index,
            addrs: decode_route_addrs(addrs, &msg[hdrlen..]),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a routing message with the given kind, index, priority and
    /// address block.
    pub(crate) fn rtm(kind: u8, index: u16, priority: u8, addrs: i32, block: &[u8]) -> Vec<u8> {
        let hdrlen = 24usize;
        let msglen = hdrlen + block.len();
        let mut msg = vec![0u8; hdrlen];
        msg[0..2].copy_from_slice(&(msglen as u16).to_ne_bytes());
        msg[2] = RTM_VERSION;
        msg[3] = kind;
        msg[4..6].copy_from_slice(&(hdrlen as u16).to_ne_bytes());
        msg[6..8].copy_from_slice(&index.to_ne_bytes());
        msg[10] = priority;
        msg[12..16].copy_from_slice(&addrs.to_ne_bytes());
        msg.extend_from_slice(block);
        msg
    }

    fn sockaddr(len: u8, family: u8) -> Vec<u8> {
        let mut sa = vec![0xaa; roundup(len as usize)];
        sa[0] = len;
        sa[1] = family;
        sa
    }

    #[test]
    fn test_roundup() {
        assert_eq!(roundup(0), SOCKADDR_ALIGN);
        assert_eq!(roundup(1), SOCKADDR_ALIGN);
        assert_eq!(roundup(16), 16);
        assert_eq!(roundup(17), 16 + SOCKADDR_ALIGN);
    }

    #[test]
    fn test_decode_selected_roles() {
        let mut block = sockaddr(16, 2);
        block.extend(sockaddr(20, 18));

        let table = decode_route_addrs((1 << 0) | (1 << 2), &block);
        assert_eq!(table[0].map(|sa| sa.len()), Some(16));
        assert_eq!(table[0].map(|sa| sa[1]), Some(2));
        assert_eq!(table[2].map(|sa| sa.len()), Some(20));
        assert_eq!(table[2].map(|sa| sa[1]), Some(18));
        for (i, slot) in table.iter().enumerate() {
            if i != 0 && i != 2 {
                assert!(slot.is_none(), "role {} populated", i);
            }
        }
    }

    #[test]
    fn test_decode_stops_at_overrun() {
        let mut block = sockaddr(16, 2);
        block.push(200);
        let table = decode_route_addrs(0b11, &block);
        assert!(table[0].is_some());
        assert!(table[1].is_none());
    }

    #[test]
    fn test_decode_empty_mask() {
        let table = decode_route_addrs(0, &[16, 2, 0, 0]);
        assert!(table.iter().all(Option::is_none));
    }

    #[test]
    fn test_parse_ifinfo() {
        let msg = rtm(RTM_IFINFO, 3, 0, 0, &[]);
        let parsed = RouteMessage::parse(&msg).unwrap().unwrap();
        assert_eq!(parsed.kind, RouteMessageKind::IfInfo);
        assert_eq!(parsed.index, 3);
    }

    #[test]
    fn test_parse_proposal_priority() {
        let msg = rtm(RTM_PROPOSAL, 0, RTP_PROPOSAL_SOLICIT, 0, &[]);
        let parsed = RouteMessage::parse(&msg).unwrap().unwrap();
        assert_eq!(parsed.kind, RouteMessageKind::Proposal(RTP_PROPOSAL_SOLICIT));
    }

    #[test]
    fn test_parse_partial() {
        let msg = rtm(RTM_NEWADDR, 1, 0, 0, &[0; 16]);
        assert!(matches!(
            RouteMessage::parse(&msg[..20]),
            Err(FrontendError::ParseError(_))
        ));
        assert!(RouteMessage::parse(&msg[..1]).is_err());
    }

    #[test]
    fn test_parse_other_version_ignored() {
        let mut msg = rtm(RTM_IFINFO, 1, 0, 0, &[]);
        msg[2] = RTM_VERSION + 1;
        assert!(RouteMessage::parse(&msg).unwrap().is_none());
    }

    #[test]
    fn test_parse_bad_header_length() {
        let mut msg = rtm(RTM_IFINFO, 1, 0, 0, &[]);
        msg[4..6].copy_from_slice(&200u16.to_ne_bytes());
        assert!(RouteMessage::parse(&msg).is_err());
    }
}

//! Ethernet/IPv4/UDP encapsulation for raw link-layer transmission

use super::MacAddr;
use std::io::IoSlice;
use std::net::Ipv4Addr;

/// DHCP server port (bootps)
pub const SERVER_PORT: u16 = 67;
/// DHCP client port (bootpc)
pub const CLIENT_PORT: u16 = 68;

pub const ETHER_HEADER_LEN: usize = 14;
pub const IP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

const ETHERTYPE_IP: u16 = 0x0800;
const IPTOS_LOWDELAY: u8 = 0x10;
const IP_TTL: u8 = 128;
const IPPROTO_UDP: u8 = 17;

/// One's complement running sum over `data`, folded into 16 bits after
/// every addition. An odd trailing byte is padded with zero.
pub fn checksum(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        if sum > 0xFFFF {
            sum -= 0xFFFF;
        }
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
        if sum > 0xFFFF {
            sum -= 0xFFFF;
        }
    }
    sum
}

/// Final complement of a running sum, ready to be stored big-endian.
pub fn wrapsum(sum: u32) -> u16 {
    !(sum as u16)
}

/// Headers wrapped around a DHCP payload for broadcast transmission on a
/// capture handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeaders {
    pub ether: [u8; ETHER_HEADER_LEN],
    pub ip: [u8; IP_HEADER_LEN],
    pub udp: [u8; UDP_HEADER_LEN],
}

impl FrameHeaders {
    /// Build broadcast headers from `source` for `payload`.
    pub fn broadcast(source: &MacAddr, payload: &[u8]) -> Self {
        let mut ether = [0u8; ETHER_HEADER_LEN];
        ether[0..6].copy_from_slice(&[0xff; 6]);
        ether[6..12].copy_from_slice(source);
        ether[12..14].copy_from_slice(&ETHERTYPE_IP.to_be_bytes());

        let src = Ipv4Addr::UNSPECIFIED.octets();
        let dst = Ipv4Addr::BROADCAST.octets();
        let udp_len = (UDP_HEADER_LEN + payload.len()) as u16;
        let ip_len = (IP_HEADER_LEN + UDP_HEADER_LEN + payload.len()) as u16;

        let mut ip = [0u8; IP_HEADER_LEN];
        ip[0] = (4 << 4) | 5;
        ip[1] = IPTOS_LOWDELAY;
        ip[2..4].copy_from_slice(&ip_len.to_be_bytes());
        // id and fragment offset stay zero
        ip[8] = IP_TTL;
        ip[9] = IPPROTO_UDP;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);
        let ip_sum = wrapsum(checksum(&ip, 0));
        ip[10..12].copy_from_slice(&ip_sum.to_be_bytes());

        let mut udp = [0u8; UDP_HEADER_LEN];
        udp[0..2].copy_from_slice(&CLIENT_PORT.to_be_bytes());
        udp[2..4].copy_from_slice(&SERVER_PORT.to_be_bytes());
        udp[4..6].copy_from_slice(&udp_len.to_be_bytes());

        // pseudo header: source, destination, protocol, UDP length
        let pseudo = checksum(&ip[12..20], IPPROTO_UDP as u32 + udp_len as u32);
        let udp_sum = wrapsum(checksum(&udp, checksum(payload, pseudo)));
        udp[6..8].copy_from_slice(&udp_sum.to_be_bytes());

        Self { ether, ip, udp }
    }

    /// Gather list for a single vectored write of the whole frame.
    pub fn io_slices<'a>(&'a self, payload: &'a [u8]) -> [IoSlice<'a>; 4] {
        [
            IoSlice::new(&self.ether),
            IoSlice::new(&self.ip),
            IoSlice::new(&self.udp),
            IoSlice::new(payload),
        ]
    }

    pub fn frame_len(&self, payload: &[u8]) -> usize {
        ETHER_HEADER_LEN + IP_HEADER_LEN + UDP_HEADER_LEN + payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddr = [0x02, 0x00, 0x5e, 0x10, 0x20, 0x30];

    #[test]
    fn test_checksum_odd_length() {
        // 0x0102 + 0x0300
        assert_eq!(checksum(&[0x01, 0x02, 0x03], 0), 0x0402);
    }

    #[test]
    fn test_checksum_folds_carry() {
        assert_eq!(checksum(&[0xff, 0xff, 0x00, 0x02], 0), 0x0002);
    }

    #[test]
    fn test_ip_header_checksum_verifies() {
        let headers = FrameHeaders::broadcast(&MAC, &[0u8; 300]);
        assert_eq!(wrapsum(checksum(&headers.ip, 0)), 0);
        assert_eq!(headers.ip[0], 0x45);
        assert_eq!(headers.ip[8], 128);
        assert_eq!(&headers.ip[16..20], &[255, 255, 255, 255]);
        assert_eq!(u16::from_be_bytes([headers.ip[2], headers.ip[3]]), 328);
    }

    #[test]
    fn test_udp_checksum_verifies() {
        let payload = [0x42u8; 301];
        let headers = FrameHeaders::broadcast(&MAC, &payload);
        let udp_len = u16::from_be_bytes([headers.udp[4], headers.udp[5]]);
        assert_eq!(udp_len as usize, UDP_HEADER_LEN + payload.len());
        let pseudo = checksum(&headers.ip[12..20], IPPROTO_UDP as u32 + udp_len as u32);
        let sum = checksum(&headers.udp, checksum(&payload, pseudo));
        assert_eq!(wrapsum(sum), 0);
    }

    #[test]
    fn test_ethernet_header() {
        let headers = FrameHeaders::broadcast(&MAC, &[]);
        assert_eq!(&headers.ether[0..6], &[0xff; 6]);
        assert_eq!(&headers.ether[6..12], &MAC);
        assert_eq!(&headers.ether[12..14], &[0x08, 0x00]);
        assert_eq!(&headers.udp[0..4], &[0, 68, 0, 67]);
    }

    #[test]
    fn test_frame_len() {
        let payload = [0u8; 10];
        let headers = FrameHeaders::broadcast(&MAC, &payload);
        assert_eq!(headers.frame_len(&payload), 14 + 20 + 8 + 10);
        let total: usize = headers.io_slices(&payload).iter().map(|s| s.len()).sum();
        assert_eq!(total, headers.frame_len(&payload));
    }
}

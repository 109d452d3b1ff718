//! Kernel boundary
//!
//! Per-interface flag, extended flag and routing domain queries, interface
//! enumeration and the system address list. Everything the route monitor
//! needs from the kernel goes through [`KernelQuery`] so the refresh logic
//! can run against a mock.

use crate::wire::MacAddr;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::warn;

/// Interface flags (`IFF_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IfFlags(pub i32);

impl IfFlags {
    pub const UP: i32 = libc::IFF_UP;
    pub const RUNNING: i32 = libc::IFF_RUNNING;

    /// Both administratively up and running
    pub fn is_running(self) -> bool {
        self.0 & (Self::UP | Self::RUNNING) == (Self::UP | Self::RUNNING)
    }
}

/// Extended interface flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XFlags(pub i32);

impl XFlags {
    /// Interface is flagged for IPv4 autoconfiguration
    pub const AUTOCONF4: i32 = 0x80;

    pub fn autoconf4(self) -> bool {
        self.0 & Self::AUTOCONF4 != 0
    }
}

/// Link state reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Unknown,
    Down,
    Up,
}

impl LinkState {
    /// Map a BSD `ifi_link_state` value. Anything at or above
    /// `LINK_STATE_UP` (4) is up, including the duplex variants.
    pub fn from_if_data(state: u8) -> Self {
        match state {
            0 => LinkState::Unknown,
            1..=3 => LinkState::Down,
            _ => LinkState::Up,
        }
    }
}

/// Link-layer details of one interface from the system address list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub link_state: LinkState,
    /// Present only for Ethernet-type links with a 6-byte address
    pub hw_address: Option<MacAddr>,
}

/// One link-layer entry of an interface in the system address list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEntry {
    pub link_state: LinkState,
    /// Ethernet-type link with a 6-byte address
    pub ethernet: bool,
    pub hw_address: Option<MacAddr>,
}

/// Fold an interface's link entries into its [`LinkInfo`].
///
/// Every entry updates the link state. The scan stops at the first
/// Ethernet entry, which supplies the hardware address. Returns `None`
/// when there is no link entry at all.
pub fn scan_link_entries(entries: impl IntoIterator<Item = LinkEntry>) -> Option<LinkInfo> {
    let mut found: Option<LinkInfo> = None;
    for entry in entries {
        let info = found.get_or_insert_with(LinkInfo::default);
        info.link_state = entry.link_state;
        if entry.ethernet {
            if let Some(mac) = entry.hw_address {
                info.hw_address = Some(mac);
                break;
            }
        }
    }
    found
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn is_ethernet(link: &nix::sys::socket::LinkAddr) -> bool {
    link.hatype() == libc::ARPHRD_ETHER && link.halen() == ETHER_ADDR_LEN
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn is_ethernet(link: &nix::sys::socket::LinkAddr) -> bool {
    const IFT_ETHER: u8 = 0x06;
    link.datalink_type() == IFT_ETHER && link.alen() == ETHER_ADDR_LEN
}

const ETHER_ADDR_LEN: usize = 6;

/// Kernel queries used by interface refresh and startup enumeration
#[cfg_attr(test, mockall::automock)]
pub trait KernelQuery {
    /// Resolve an index to a name; `None` if the interface is gone.
    fn index_to_name(&self, if_index: u32) -> Option<String>;
    fn flags(&self, if_name: &str) -> io::Result<IfFlags>;
    fn xflags(&self, if_name: &str) -> io::Result<XFlags>;
    fn rdomain(&self, if_name: &str) -> io::Result<i32>;
    /// All current interfaces as (index, name)
    fn interfaces(&self) -> io::Result<Vec<(u32, String)>>;
    /// Link entry of `if_name` in the system address list
    fn link_info(&self, if_name: &str) -> io::Result<Option<LinkInfo>>;
}

#[cfg(target_os = "linux")]
const IFRU_SIZE: usize = 24;
#[cfg(not(target_os = "linux"))]
const IFRU_SIZE: usize = 16;

/// `struct ifreq` with the union kept as raw bytes
#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    ifru: [u8; IFRU_SIZE],
}

impl IfReq {
    fn new(if_name: &str) -> io::Result<Self> {
        let c_name = CString::new(if_name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;
        let bytes = c_name.as_bytes_with_nul();
        if bytes.len() > libc::IFNAMSIZ {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
        }
        let mut req = IfReq {
            name: [0; libc::IFNAMSIZ],
            ifru: [0; IFRU_SIZE],
        };
        for (dst, src) in req.name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        Ok(req)
    }

    fn short(&self) -> i16 {
        i16::from_ne_bytes([self.ifru[0], self.ifru[1]])
    }

    #[cfg(target_os = "openbsd")]
    fn int(&self) -> i32 {
        i32::from_ne_bytes([self.ifru[0], self.ifru[1], self.ifru[2], self.ifru[3]])
    }

    /// Point `ifr_data` at `data`.
    #[cfg(target_os = "openbsd")]
    fn set_data<T>(&mut self, data: *mut T) {
        let ptr = (data as usize).to_ne_bytes();
        self.ifru[..ptr.len()].copy_from_slice(&ptr);
    }
}

#[cfg(target_os = "openbsd")]
mod ioctls {
    pub const SIOCGIFFLAGS: libc::c_ulong = 0xc020_6911;
    pub const SIOCGIFXFLAGS: libc::c_ulong = 0xc020_699e;
    pub const SIOCGIFRDOMAIN: libc::c_ulong = 0xc020_69a0;
    pub const SIOCGIFDATA: libc::c_ulong = 0xc020_691b;
}

#[cfg(not(target_os = "openbsd"))]
mod ioctls {
    pub const SIOCGIFFLAGS: libc::c_ulong = libc::SIOCGIFFLAGS as libc::c_ulong;
}

/// Kernel queries against the running system
pub struct SystemKernel {
    ioctl_sock: OwnedFd,
    /// Interfaces treated as autoconf-eligible where the kernel has no
    /// extended flag for it
    #[cfg_attr(target_os = "openbsd", allow(dead_code))]
    autoconf: HashSet<String>,
}

impl SystemKernel {
    pub fn new(autoconf: impl IntoIterator<Item = String>) -> io::Result<Self> {
        use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};

        let ioctl_sock = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(io::Error::from)?;

        Ok(Self {
            ioctl_sock,
            autoconf: autoconf.into_iter().collect(),
        })
    }

    fn ioctl(&self, request: libc::c_ulong, if_name: &str, what: &str) -> io::Result<IfReq> {
        self.ioctl_req(request, IfReq::new(if_name)?, what)
    }

    fn ioctl_req(&self, request: libc::c_ulong, mut req: IfReq, what: &str) -> io::Result<IfReq> {
        let ret = unsafe {
            libc::ioctl(
                self.ioctl_sock.as_raw_fd(),
                request as _,
                &mut req as *mut IfReq,
            )
        };
        if ret == -1 {
            let err = io::Error::last_os_error();
            warn!("{}: {}", what, err);
            return Err(err);
        }
        Ok(req)
    }

    /// Carrier as seen by the driver
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn link_state(&self, ifa: &nix::ifaddrs::InterfaceAddress) -> LinkState {
        use nix::net::if_::InterfaceFlags;

        if ifa.flags.contains(InterfaceFlags::IFF_LOWER_UP) {
            LinkState::Up
        } else {
            LinkState::Down
        }
    }

    #[cfg(target_os = "openbsd")]
    fn link_state(&self, ifa: &nix::ifaddrs::InterfaceAddress) -> LinkState {
        // SAFETY: if_data is plain old data
        let mut data: libc::if_data = unsafe { std::mem::zeroed() };
        let Ok(mut req) = IfReq::new(&ifa.interface_name) else {
            return LinkState::Unknown;
        };
        req.set_data(&mut data as *mut libc::if_data);
        match self.ioctl_req(ioctls::SIOCGIFDATA, req, "SIOCGIFDATA") {
            Ok(_) => LinkState::from_if_data(data.ifi_link_state),
            Err(_) => LinkState::Unknown,
        }
    }

    /// No link state in the address list here
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "openbsd")))]
    fn link_state(&self, _ifa: &nix::ifaddrs::InterfaceAddress) -> LinkState {
        LinkState::Unknown
    }
}

impl KernelQuery for SystemKernel {
    fn index_to_name(&self, if_index: u32) -> Option<String> {
        let mut buf = [0 as libc::c_char; libc::IFNAMSIZ];
        let ret = unsafe { libc::if_indextoname(if_index, buf.as_mut_ptr()) };
        if ret.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(name.to_string_lossy().into_owned())
    }

    fn flags(&self, if_name: &str) -> io::Result<IfFlags> {
        let req = self.ioctl(ioctls::SIOCGIFFLAGS, if_name, "SIOCGIFFLAGS")?;
        Ok(IfFlags(req.short() as u16 as i32))
    }

    #[cfg(target_os = "openbsd")]
    fn xflags(&self, if_name: &str) -> io::Result<XFlags> {
        let req = self.ioctl(ioctls::SIOCGIFXFLAGS, if_name, "SIOCGIFXFLAGS")?;
        Ok(XFlags(req.int()))
    }

    #[cfg(not(target_os = "openbsd"))]
    fn xflags(&self, if_name: &str) -> io::Result<XFlags> {
        // No kernel flag here: the interface must still exist, and the
        // configured list decides eligibility.
        self.flags(if_name)?;
        if self.autoconf.contains(if_name) {
            Ok(XFlags(XFlags::AUTOCONF4))
        } else {
            Ok(XFlags::default())
        }
    }

    #[cfg(target_os = "openbsd")]
    fn rdomain(&self, if_name: &str) -> io::Result<i32> {
        let req = self.ioctl(ioctls::SIOCGIFRDOMAIN, if_name, "SIOCGIFRDOMAIN")?;
        Ok(req.int())
    }

    #[cfg(not(target_os = "openbsd"))]
    fn rdomain(&self, if_name: &str) -> io::Result<i32> {
        // single routing table
        self.flags(if_name).map(|_| 0)
    }

    fn interfaces(&self) -> io::Result<Vec<(u32, String)>> {
        let list = nix::net::if_::if_nameindex().map_err(io::Error::from)?;
        Ok(list
            .iter()
            .map(|iface| (iface.index(), iface.name().to_string_lossy().into_owned()))
            .collect())
    }

    fn link_info(&self, if_name: &str) -> io::Result<Option<LinkInfo>> {
        let addrs = nix::ifaddrs::getifaddrs().map_err(io::Error::from)?;
        let entries = addrs
            .filter(|ifa| ifa.interface_name == if_name)
            .filter_map(|ifa| {
                let link = *ifa.address.as_ref()?.as_link_addr()?;
                Some(LinkEntry {
                    link_state: self.link_state(&ifa),
                    ethernet: is_ethernet(&link),
                    hw_address: link.addr(),
                })
            });
        Ok(scan_link_entries(entries))
    }
}

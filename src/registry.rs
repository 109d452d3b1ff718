//! Interface registry
//!
//! In-memory table of the interfaces the frontend serves, keyed by kernel
//! interface index. Fleet sizes are tens of interfaces, so lookups are a
//! linear scan.

use crate::handle::{CaptureHandle, TransmitHandle};
use crate::wire::MacAddr;
use std::net::Ipv4Addr;
use tracing::debug;

/// One monitored network interface
pub struct Interface {
    pub if_index: u32,
    pub rdomain: i32,
    pub hw_address: MacAddr,
    /// Transaction id of the exchange in progress
    pub xid: u32,
    /// A DISCOVER was asked for before a capture handle arrived
    pub send_discover: bool,
    pub requested_ip: Ipv4Addr,
    pub server_identifier: Ipv4Addr,
    pub dhcp_server: Ipv4Addr,
    pub(crate) capture: Option<CaptureHandle>,
    pub(crate) transmit: Option<TransmitHandle>,
}

impl Interface {
    fn new(if_index: u32, rdomain: i32) -> Self {
        Self {
            if_index,
            rdomain,
            hw_address: [0; 6],
            xid: 0,
            send_discover: false,
            requested_ip: Ipv4Addr::UNSPECIFIED,
            server_identifier: Ipv4Addr::UNSPECIFIED,
            dhcp_server: Ipv4Addr::UNSPECIFIED,
            capture: None,
            transmit: None,
        }
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn has_transmit(&self) -> bool {
        self.transmit.is_some()
    }

    pub fn capture_mut(&mut self) -> Option<&mut CaptureHandle> {
        self.capture.as_mut()
    }

    /// Install a transmit handle, returning the one it replaces.
    pub fn set_transmit(&mut self, handle: TransmitHandle) -> Option<TransmitHandle> {
        self.transmit.replace(handle)
    }

    /// Close the transmit handle, if any.
    pub fn close_transmit(&mut self) {
        if self.transmit.take().is_some() {
            debug!("closed udp socket on interface {}", self.if_index);
        }
    }

    /// Close both handles.
    pub fn close_handles(&mut self) {
        self.capture = None;
        self.transmit = None;
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("if_index", &self.if_index)
            .field("rdomain", &self.rdomain)
            .field("hw_address", &self.hw_address)
            .field("xid", &self.xid)
            .field("send_discover", &self.send_discover)
            .field("capture", &self.capture.is_some())
            .field("transmit", &self.transmit.is_some())
            .finish()
    }
}

/// What an upsert did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New entry
    Created,
    /// Existing entry moved to another routing domain; handles were closed
    DomainChanged,
    /// Existing entry, same routing domain
    Unchanged,
}

#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    interfaces: Vec<Interface>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, if_index: u32) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.if_index == if_index)
    }

    pub fn lookup_mut(&mut self, if_index: u32) -> Option<&mut Interface> {
        self.interfaces.iter_mut().find(|i| i.if_index == if_index)
    }

    /// Create the entry if absent, else refresh its routing domain.
    ///
    /// Sockets are scoped to a routing domain, so a domain change closes
    /// both handles.
    pub fn upsert(&mut self, if_index: u32, rdomain: i32) -> (Upsert, &mut Interface) {
        match self.interfaces.iter().position(|i| i.if_index == if_index) {
            Some(pos) => {
                let iface = &mut self.interfaces[pos];
                if iface.rdomain == rdomain {
                    return (Upsert::Unchanged, iface);
                }
                debug!(
                    "interface {} moved from rdomain {} to {}",
                    if_index, iface.rdomain, rdomain
                );
                iface.rdomain = rdomain;
                iface.close_handles();
                (Upsert::DomainChanged, iface)
            }
            None => {
                debug!("new interface {} in rdomain {}", if_index, rdomain);
                self.interfaces.push(Interface::new(if_index, rdomain));
                let last = self.interfaces.len() - 1;
                (Upsert::Created, &mut self.interfaces[last])
            }
        }
    }

    /// Delete the entry, closing both handles.
    pub fn remove(&mut self, if_index: u32) -> bool {
        match self.interfaces.iter().position(|i| i.if_index == if_index) {
            Some(pos) => {
                let mut iface = self.interfaces.swap_remove(pos);
                iface.close_handles();
                debug!("removed interface {}", if_index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    /// Close every handle; used on shutdown.
    pub fn clear(&mut self) {
        for iface in &mut self.interfaces {
            iface.close_handles();
        }
        self.interfaces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::tests::{RecordingDatagram, RecordingLink};
    use std::sync::Arc;

    fn with_handles(registry: &mut InterfaceRegistry, if_index: u32) -> Arc<RecordingLink> {
        let link = Arc::new(RecordingLink::default());
        let (_, iface) = registry.upsert(if_index, 0);
        iface.capture = Some(CaptureHandle::new(link.clone()));
        iface.set_transmit(Box::new(RecordingDatagram::default()));
        link
    }

    #[test]
    fn test_upsert_creates_once() {
        let mut registry = InterfaceRegistry::new();
        assert_eq!(registry.upsert(2, 0).0, Upsert::Created);
        assert_eq!(registry.upsert(2, 0).0, Upsert::Unchanged);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(2).unwrap().rdomain, 0);
        assert!(registry.lookup(3).is_none());
    }

    #[test]
    fn test_same_domain_keeps_handles() {
        let mut registry = InterfaceRegistry::new();
        with_handles(&mut registry, 2);
        registry.upsert(2, 0);
        let iface = registry.lookup(2).unwrap();
        assert!(iface.has_capture());
        assert!(iface.has_transmit());
    }

    #[test]
    fn test_domain_change_closes_handles() {
        let mut registry = InterfaceRegistry::new();
        let link = with_handles(&mut registry, 2);
        assert_eq!(Arc::strong_count(&link), 2);

        let (outcome, iface) = registry.upsert(2, 5);
        assert_eq!(outcome, Upsert::DomainChanged);
        assert_eq!(iface.rdomain, 5);
        assert!(!iface.has_capture());
        assert!(!iface.has_transmit());
        // the registry no longer holds the socket
        assert_eq!(Arc::strong_count(&link), 1);
    }

    #[test]
    fn test_remove_releases_handles() {
        let mut registry = InterfaceRegistry::new();
        let link = with_handles(&mut registry, 7);
        registry.upsert(8, 0);

        assert!(registry.remove(7));
        assert!(!registry.remove(7));
        assert_eq!(Arc::strong_count(&link), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(8).is_some());
    }

    #[test]
    fn test_close_transmit() {
        let mut registry = InterfaceRegistry::new();
        with_handles(&mut registry, 1);
        let iface = registry.lookup_mut(1).unwrap();
        iface.close_transmit();
        assert!(!iface.has_transmit());
        assert!(iface.has_capture());
    }
}

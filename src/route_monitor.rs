//! Routing socket event handling
//!
//! Turns interface, address and proposal notifications from the kernel
//! into registry updates and upstream notifications.

use crate::error::FrontendResult;
use crate::kernel::KernelQuery;
use crate::message::{ImsgIfInfo, ToEngine, ToMain, Upstream};
use crate::registry::{InterfaceRegistry, Upsert};
use crate::wire::route::RTP_PROPOSAL_SOLICIT;
use crate::wire::{RouteMessage, RouteMessageKind};
use tracing::{debug, warn};

/// Decode and act on one routing socket read.
///
/// Malformed kernel data is logged and dropped. Only a failure to list the
/// system addresses is returned.
pub fn handle_route_read(
    buf: &[u8],
    registry: &mut InterfaceRegistry,
    kernel: &dyn KernelQuery,
    upstream: &mut dyn Upstream,
) -> FrontendResult<()> {
    match RouteMessage::parse(buf) {
        Ok(Some(msg)) => handle_route_message(&msg, registry, kernel, upstream),
        Ok(None) => Ok(()),
        Err(e) => {
            warn!("{}", e);
            Ok(())
        }
    }
}

pub fn handle_route_message(
    msg: &RouteMessage<'_>,
    registry: &mut InterfaceRegistry,
    kernel: &dyn KernelQuery,
    upstream: &mut dyn Upstream,
) -> FrontendResult<()> {
    let if_index = u32::from(msg.index);

    match msg.kind {
        RouteMessageKind::IfInfo => match kernel.index_to_name(if_index) {
            None => {
                debug!("RTM_IFINFO: lost if {}", if_index);
                upstream.to_engine(ToEngine::RemoveIf { if_index });
                registry.remove(if_index);
            }
            Some(if_name) => {
                let eligible = kernel
                    .xflags(&if_name)
                    .map(|x| x.autoconf4())
                    .unwrap_or(false);
                if eligible {
                    update_iface(if_index, &if_name, registry, kernel, upstream)?;
                } else {
                    // the entry and its handles stay until the interface
                    // itself goes away
                    debug!("RTM_IFINFO: {}({}) no(longer) autoconf4", if_name, if_index);
                    upstream.to_engine(ToEngine::RemoveIf { if_index });
                }
            }
        },
        RouteMessageKind::NewAddr => match kernel.index_to_name(if_index) {
            Some(if_name) => {
                debug!("RTM_NEWADDR: {}[{}]", if_name, if_index);
                update_iface(if_index, &if_name, registry, kernel, upstream)?;
            }
            None => debug!("RTM_NEWADDR: unknown if {}", if_index),
        },
        RouteMessageKind::Proposal(priority) => {
            if priority == RTP_PROPOSAL_SOLICIT {
                debug!("RTP_PROPOSAL_SOLICIT");
                upstream.to_engine(ToEngine::ReproposeRdns);
            }
        }
        RouteMessageKind::Other(kind) => debug!("unexpected RTM: {}", kind),
    }

    Ok(())
}

/// Refresh one interface from the kernel and report it to main.
///
/// Returns quietly when a flag query fails or the interface is not
/// flagged for IPv4 autoconfiguration.
pub fn update_iface(
    if_index: u32,
    if_name: &str,
    registry: &mut InterfaceRegistry,
    kernel: &dyn KernelQuery,
    upstream: &mut dyn Upstream,
) -> FrontendResult<()> {
    let Ok(flags) = kernel.flags(if_name) else {
        return Ok(());
    };
    let Ok(xflags) = kernel.xflags(if_name) else {
        return Ok(());
    };
    if !xflags.autoconf4() {
        return Ok(());
    }
    let Ok(rdomain) = kernel.rdomain(if_name) else {
        return Ok(());
    };

    let (outcome, iface) = registry.upsert(if_index, rdomain);
    match outcome {
        Upsert::Created | Upsert::DomainChanged => {
            upstream.to_main(ToMain::OpenBpfsock { if_index });
        }
        Upsert::Unchanged => {}
    }

    let link = kernel.link_info(if_name)?.unwrap_or_default();
    if let Some(hw_address) = link.hw_address {
        iface.hw_address = hw_address;
    }

    let info = ImsgIfInfo {
        if_index,
        rdomain,
        running: flags.is_running(),
        link_state: link.link_state,
        hw_address: iface.hw_address,
    };
    debug!("update_iface: {} {:?}", if_name, info);
    upstream.to_main(ToMain::UpdateIf(info));

    Ok(())
}

/// Refresh every interface the kernel currently knows about.
pub fn refresh_all(
    registry: &mut InterfaceRegistry,
    kernel: &dyn KernelQuery,
    upstream: &mut dyn Upstream,
) -> FrontendResult<()> {
    for (if_index, if_name) in kernel.interfaces()? {
        update_iface(if_index, &if_name, registry, kernel, upstream)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::tests::{RecordingDatagram, RecordingLink};
    use crate::handle::CaptureHandle;
    use crate::kernel::{IfFlags, LinkInfo, LinkState, MockKernelQuery, XFlags};
    use crate::message::tests::RecordingUpstream;
    use crate::wire::route::tests::rtm;
    use crate::wire::route::{RTM_IFINFO, RTM_NEWADDR, RTM_PROPOSAL};
    use mockall::predicate::eq;
    use std::io;
    use std::sync::Arc;

    const MAC: [u8; 6] = [0x00, 0x1b, 0x21, 0x0a, 0x0b, 0x0c];

    fn eligible_kernel(name: &'static str, rdomain: i32) -> MockKernelQuery {
        let mut kernel = MockKernelQuery::new();
        kernel
            .expect_index_to_name()
            .returning(move |_| Some(name.to_string()));
        kernel
            .expect_flags()
            .returning(|_| Ok(IfFlags(IfFlags::UP | IfFlags::RUNNING)));
        kernel
            .expect_xflags()
            .returning(|_| Ok(XFlags(XFlags::AUTOCONF4)));
        kernel.expect_rdomain().returning(move |_| Ok(rdomain));
        kernel.expect_link_info().returning(|_| {
            Ok(Some(LinkInfo {
                link_state: LinkState::Up,
                hw_address: Some(MAC),
            }))
        });
        kernel
    }

    #[test]
    fn test_refresh_creates_and_reports() {
        let kernel = eligible_kernel("em0", 0);
        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();

        update_iface(2, "em0", &mut registry, &kernel, &mut upstream).unwrap();

        assert_eq!(registry.lookup(2).unwrap().hw_address, MAC);
        assert_eq!(
            upstream.main,
            vec![
                ToMain::OpenBpfsock { if_index: 2 },
                ToMain::UpdateIf(ImsgIfInfo {
                    if_index: 2,
                    rdomain: 0,
                    running: true,
                    link_state: LinkState::Up,
                    hw_address: MAC,
                }),
            ]
        );
        assert!(upstream.engine.is_empty());

        // a second refresh only reports
        update_iface(2, "em0", &mut registry, &kernel, &mut upstream).unwrap();
        assert_eq!(upstream.main.len(), 3);
        assert!(matches!(upstream.main[2], ToMain::UpdateIf(_)));
    }

    #[test]
    fn test_refresh_skips_non_autoconf() {
        let mut kernel = MockKernelQuery::new();
        kernel.expect_flags().returning(|_| Ok(IfFlags(IfFlags::UP)));
        kernel.expect_xflags().returning(|_| Ok(XFlags(0)));
        kernel.expect_rdomain().never();
        kernel.expect_link_info().never();

        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();
        update_iface(4, "lo0", &mut registry, &kernel, &mut upstream).unwrap();

        assert!(registry.is_empty());
        assert!(upstream.main.is_empty());
        assert!(upstream.engine.is_empty());
    }

    #[test]
    fn test_refresh_aborts_on_query_failure() {
        let mut kernel = MockKernelQuery::new();
        kernel
            .expect_flags()
            .returning(|_| Err(io::Error::from_raw_os_error(libc::ENXIO)));

        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();
        update_iface(4, "em9", &mut registry, &kernel, &mut upstream).unwrap();
        assert!(registry.is_empty());
        assert!(upstream.main.is_empty());
    }

    #[test]
    fn test_refresh_keeps_mac_without_link_entry() {
        let mut kernel = MockKernelQuery::new();
        kernel
            .expect_flags()
            .returning(|_| Ok(IfFlags(IfFlags::UP)));
        kernel
            .expect_xflags()
            .returning(|_| Ok(XFlags(XFlags::AUTOCONF4)));
        kernel.expect_rdomain().returning(|_| Ok(0));
        kernel.expect_link_info().returning(|_| Ok(None));

        let mut registry = InterfaceRegistry::new();
        registry.upsert(3, 0).1.hw_address = MAC;
        let mut upstream = RecordingUpstream::default();
        update_iface(3, "em1", &mut registry, &kernel, &mut upstream).unwrap();

        match &upstream.main[..] {
            [ToMain::UpdateIf(info)] => {
                assert!(!info.running);
                assert_eq!(info.hw_address, MAC);
                assert_eq!(info.link_state, LinkState::Unknown);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_domain_change_rerequests_capture() {
        let kernel = eligible_kernel("em0", 7);
        let mut registry = InterfaceRegistry::new();
        let link = Arc::new(RecordingLink::default());
        {
            let (_, iface) = registry.upsert(2, 0);
            iface.capture = Some(CaptureHandle::new(link.clone()));
            iface.set_transmit(Box::new(RecordingDatagram::default()));
        }
        let mut upstream = RecordingUpstream::default();

        update_iface(2, "em0", &mut registry, &kernel, &mut upstream).unwrap();

        let iface = registry.lookup(2).unwrap();
        assert_eq!(iface.rdomain, 7);
        assert!(!iface.has_capture());
        assert!(!iface.has_transmit());
        assert_eq!(Arc::strong_count(&link), 1);
        assert_eq!(upstream.main[0], ToMain::OpenBpfsock { if_index: 2 });
    }

    #[test]
    fn test_ifinfo_lost_interface_removed() {
        let mut kernel = MockKernelQuery::new();
        kernel.expect_index_to_name().with(eq(5)).returning(|_| None);

        let mut registry = InterfaceRegistry::new();
        registry.upsert(5, 0);
        let mut upstream = RecordingUpstream::default();

        let msg = rtm(RTM_IFINFO, 5, 0, 0, &[]);
        handle_route_read(&msg, &mut registry, &kernel, &mut upstream).unwrap();

        assert!(registry.lookup(5).is_none());
        assert_eq!(upstream.engine, vec![ToEngine::RemoveIf { if_index: 5 }]);
    }

    #[test]
    fn test_ifinfo_lost_autoconf_keeps_entry() {
        let mut kernel = MockKernelQuery::new();
        kernel
            .expect_index_to_name()
            .returning(|_| Some("em0".to_string()));
        kernel.expect_xflags().returning(|_| Ok(XFlags(0)));

        let mut registry = InterfaceRegistry::new();
        registry.upsert(5, 0);
        let mut upstream = RecordingUpstream::default();

        let msg = rtm(RTM_IFINFO, 5, 0, 0, &[]);
        handle_route_read(&msg, &mut registry, &kernel, &mut upstream).unwrap();

        assert!(registry.lookup(5).is_some());
        assert_eq!(upstream.engine, vec![ToEngine::RemoveIf { if_index: 5 }]);
        assert!(upstream.main.is_empty());
    }

    #[test]
    fn test_ifinfo_eligible_refreshes() {
        let kernel = eligible_kernel("em0", 0);
        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();

        let msg = rtm(RTM_IFINFO, 2, 0, 0, &[]);
        handle_route_read(&msg, &mut registry, &kernel, &mut upstream).unwrap();
        assert!(registry.lookup(2).is_some());
        assert_eq!(upstream.main.len(), 2);
    }

    #[test]
    fn test_newaddr_refreshes() {
        let kernel = eligible_kernel("em0", 0);
        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();

        let msg = rtm(RTM_NEWADDR, 2, 0, 0, &[]);
        handle_route_read(&msg, &mut registry, &kernel, &mut upstream).unwrap();
        assert!(registry.lookup(2).is_some());
    }

    #[test]
    fn test_proposal_solicit() {
        let kernel = MockKernelQuery::new();
        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();

        let solicit = rtm(RTM_PROPOSAL, 0, RTP_PROPOSAL_SOLICIT, 0, &[]);
        handle_route_read(&solicit, &mut registry, &kernel, &mut upstream).unwrap();
        let other = rtm(RTM_PROPOSAL, 0, 8, 0, &[]);
        handle_route_read(&other, &mut registry, &kernel, &mut upstream).unwrap();

        assert_eq!(upstream.engine, vec![ToEngine::ReproposeRdns]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_and_unknown_ignored() {
        let kernel = MockKernelQuery::new();
        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();

        let msg = rtm(RTM_NEWADDR, 1, 0, 0, &[0; 8]);
        handle_route_read(&msg[..10], &mut registry, &kernel, &mut upstream).unwrap();
        let other = rtm(0x1, 1, 0, 0, &[]);
        handle_route_read(&other, &mut registry, &kernel, &mut upstream).unwrap();

        assert!(upstream.main.is_empty());
        assert!(upstream.engine.is_empty());
    }

    #[test]
    fn test_refresh_all_mixed_interfaces() {
        let mut kernel = MockKernelQuery::new();
        kernel.expect_interfaces().returning(|| {
            Ok(vec![(1, "lo0".to_string()), (2, "em0".to_string())])
        });
        kernel
            .expect_flags()
            .returning(|_| Ok(IfFlags(IfFlags::UP | IfFlags::RUNNING)));
        kernel.expect_xflags().returning(|name| {
            Ok(XFlags(if name == "em0" { XFlags::AUTOCONF4 } else { 0 }))
        });
        kernel.expect_rdomain().returning(|_| Ok(0));
        kernel.expect_link_info().returning(|_| Ok(None));

        let mut registry = InterfaceRegistry::new();
        let mut upstream = RecordingUpstream::default();
        refresh_all(&mut registry, &kernel, &mut upstream).unwrap();

        assert_eq!(registry.len(), 1);
        let opens = upstream
            .main
            .iter()
            .filter(|m| matches!(m, ToMain::OpenBpfsock { .. }))
            .count();
        let updates = upstream
            .main
            .iter()
            .filter(|m| matches!(m, ToMain::UpdateIf(_)))
            .count();
        assert_eq!((opens, updates), (1, 1));
    }
}

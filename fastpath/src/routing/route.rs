//! IP forwarding node (`ipfwd`)
//!
//! Receives IP packets from routed interfaces with the head at the IP header
//! and the consumed Ethernet header in the headroom. A hit in the socket's
//! LPM table selects a neighbour slot; reachable neighbours get their
//! precomputed Ethernet header written in front of the packet and the frame
//! is transmitted on the neighbour's interface.

use std::any::Any;
use std::net::IpAddr;
use std::sync::Arc;

use smoltcp::wire::{Ipv4Packet, Ipv6Packet};
use tracing::info;

use super::NextHopId;
use super::neigh::Neighbour;
use super::tables::RouteTables;
use crate::graph::DropReason;
use crate::lcore::Lcore;
use crate::mbuf::{ETHER_HDR_LEN, PacketBuf};
use crate::module::{
    ConnectError, ConnectParam, Direction, Module, ModuleId, ModuleType, PeerInfo, Propagation,
};

/// Number of interface slots per address family.
pub const ROUTE_MAX_LINK: usize = 16;

pub const ROUTE_MODULE_NAME: &str = "ipfwd";

pub struct RouteModule {
    tables: Arc<RouteTables>,
    ipv4: [Option<ModuleId>; ROUTE_MAX_LINK],
    ipv6: [Option<ModuleId>; ROUTE_MAX_LINK],
}

impl RouteModule {
    pub fn new(tables: Arc<RouteTables>) -> Self {
        Self {
            tables,
            ipv4: [None; ROUTE_MAX_LINK],
            ipv6: [None; ROUTE_MAX_LINK],
        }
    }

    pub fn tables(&self) -> &Arc<RouteTables> {
        &self.tables
    }

    /// Interface registered under `ifidx` for the family of `addr`.
    pub fn egress(&self, addr: &IpAddr, ifidx: u16) -> Option<ModuleId> {
        let links = match addr {
            IpAddr::V4(_) => &self.ipv4,
            IpAddr::V6(_) => &self.ipv6,
        };
        links.get(usize::from(ifidx)).copied().flatten()
    }

    fn destination(m: &PacketBuf) -> Result<IpAddr, DropReason> {
        if m.is_ipv4() {
            let ip = Ipv4Packet::new_checked(m.data()).map_err(|_| DropReason::Malformed)?;
            Ok(IpAddr::V4(ip.dst_addr()))
        } else if m.is_ipv6() {
            let ip = Ipv6Packet::new_checked(m.data()).map_err(|_| DropReason::Malformed)?;
            Ok(IpAddr::V6(ip.dst_addr()))
        } else {
            Err(DropReason::UnsupportedProtocol)
        }
    }

    fn lookup(&self, socket: usize, dst: &IpAddr) -> Result<NextHopId, DropReason> {
        let lpm = self.tables.lpm(socket).ok_or(DropReason::NoTable)?;
        let nh = match dst {
            IpAddr::V4(a) => lpm.v4.load().lookup(*a),
            IpAddr::V6(a) => lpm.v6.load().lookup(*a),
        };
        nh.ok_or(DropReason::RouteMiss)
    }
}

impl Module for RouteModule {
    fn name(&self) -> &str {
        ROUTE_MODULE_NAME
    }

    fn kind(&self) -> ModuleType {
        ModuleType::Route
    }

    fn receive(&self, lc: &Lcore<'_>, mut m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        let dst = match Self::destination(&m) {
            Ok(dst) => dst,
            Err(reason) => return lc.drop_pkt(m, me, reason),
        };
        let nh = match self.lookup(lc.socket, &dst) {
            Ok(nh) => nh,
            Err(reason) => return lc.drop_pkt(m, me, reason),
        };
        let Some(neigh) = self.tables.neigh(lc.socket) else {
            return lc.drop_pkt(m, me, DropReason::NoTable);
        };

        let (if_out, hdr) = match neigh.load().get(nh) {
            None => return lc.drop_pkt(m, me, DropReason::NoNextHop),
            Some(Neighbour::Local) => return lc.drop_pkt(m, me, DropReason::LocalDelivery),
            Some(Neighbour::Unresolved { .. }) => {
                return lc.drop_pkt(m, me, DropReason::Unresolved);
            }
            Some(Neighbour::Reachable { if_out, hdr }) => (*if_out, *hdr),
        };

        match m.prepend(ETHER_HDR_LEN) {
            Some(front) => front.copy_from_slice(&hdr),
            None => return lc.drop_pkt(m, me, DropReason::NoHeadroom),
        }
        lc.send(m, me, self.egress(&dst, if_out), Direction::Xmit);
    }

    /// Locally originated traffic has no egress protocol yet.
    fn transmit(&self, lc: &Lcore<'_>, m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        lc.drop_pkt(m, me, DropReason::XmitUnsupported);
    }

    fn check_peer(
        &self,
        peer: &PeerInfo,
        param: ConnectParam,
    ) -> Result<Propagation, ConnectError> {
        if peer.kind != ModuleType::Interface {
            return Err(ConnectError::InvalidPeer {
                local: ROUTE_MODULE_NAME.to_string(),
                peer: peer.kind,
            });
        }
        let ConnectParam::Ifindex(ifidx) = param else {
            return Err(ConnectError::MissingParam {
                local: ROUTE_MODULE_NAME.to_string(),
                peer: peer.kind,
            });
        };
        if usize::from(ifidx) >= ROUTE_MAX_LINK {
            return Err(ConnectError::InvalidIndex {
                local: ROUTE_MODULE_NAME.to_string(),
                ifidx,
                max: ROUTE_MAX_LINK,
            });
        }
        Ok(Propagation::Mutual)
    }

    fn attach(&mut self, peer: &PeerInfo, param: ConnectParam) {
        if let ConnectParam::Ifindex(ifidx) = param {
            let slot = usize::from(ifidx);
            self.ipv4[slot] = Some(peer.id);
            self.ipv6[slot] = Some(peer.id);
            info!(node = ROUTE_MODULE_NAME, peer = %peer.name, ifidx, "route_connect: add interface");
        }
    }

    fn peers(&self) -> Vec<ModuleId> {
        let mut peers: Vec<_> = self.ipv4.iter().chain(&self.ipv6).flatten().copied().collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

//! Control plane for the forwarding tables
//!
//! The `RouteManager` owns the next-hop allocator and the authoritative list
//! of installed routes. Each change is applied to a private copy of every
//! socket replica and the copies are swapped in only after all of them
//! accepted the change, so the replicas never diverge.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use smoltcp::wire::EthernetAddress;
use tracing::{debug, info};

use super::nexthop::{NextHop, NextHopTable};
use super::neigh::{NeighTable, Neighbour};
use super::route::ROUTE_MAX_LINK;
use super::tables::RouteTables;
use super::{NextHopId, TableError};

/// Apply `f` to a copy of every replica; publish only if all succeed.
fn broadcast<T: Clone>(
    replicas: Vec<&ArcSwap<T>>,
    mut f: impl FnMut(&mut T) -> Result<(), TableError>,
) -> Result<(), TableError> {
    if replicas.is_empty() {
        return Err(TableError::SocketNotInitialized);
    }

    let mut staged = Vec::with_capacity(replicas.len());
    for replica in &replicas {
        let mut copy = T::clone(&replica.load());
        f(&mut copy)?;
        staged.push(copy);
    }
    for (replica, copy) in replicas.into_iter().zip(staged) {
        replica.store(Arc::new(copy));
    }
    Ok(())
}

pub struct RouteManager {
    tables: Arc<RouteTables>,
    nexthops: NextHopTable,
    routes: HashMap<IpNet, NextHopId>,
}

impl RouteManager {
    pub fn new(tables: Arc<RouteTables>) -> Self {
        let nexthops = NextHopTable::new(tables.limits().max_next_hops);
        Self {
            tables,
            nexthops,
            routes: HashMap::new(),
        }
    }

    pub fn tables(&self) -> &Arc<RouteTables> {
        &self.tables
    }

    pub fn nexthops(&self) -> &NextHopTable {
        &self.nexthops
    }

    /// Installed routes and their next hop.
    pub fn routes(&self) -> impl Iterator<Item = (&IpNet, &NextHopId)> {
        self.routes.iter()
    }

    fn update_lpm(&self, prefix: IpNet, nh: Option<NextHopId>) -> Result<(), TableError> {
        match (prefix, nh) {
            (IpNet::V4(p), Some(nh)) => {
                broadcast(self.tables.lpm4_replicas(), |lpm| lpm.add(p, nh).map(drop))
            }
            (IpNet::V6(p), Some(nh)) => {
                broadcast(self.tables.lpm6_replicas(), |lpm| lpm.add(p, nh).map(drop))
            }
            (IpNet::V4(p), None) => broadcast(self.tables.lpm4_replicas(), |lpm| {
                lpm.delete(&p).map(drop).ok_or(TableError::NotFound(prefix))
            }),
            (IpNet::V6(p), None) => broadcast(self.tables.lpm6_replicas(), |lpm| {
                lpm.delete(&p).map(drop).ok_or(TableError::NotFound(prefix))
            }),
        }
    }

    fn update_neigh(
        &self,
        f: impl FnMut(&mut NeighTable) -> Result<(), TableError>,
    ) -> Result<(), TableError> {
        broadcast(self.tables.neigh_replicas(), f)
    }

    /// Give back a route's reference on `nh`, clearing the neighbour slot
    /// when it was the last one.
    fn put_nexthop(&mut self, nh: NextHopId) -> Result<(), TableError> {
        if nh == NextHopId::LOCAL {
            return Ok(());
        }
        if let Some(NextHop { gateway, .. }) = self.nexthops.release(nh)? {
            debug!(%nh, ?gateway, "Releasing next hop");
            self.update_neigh(|neigh| {
                neigh.clear(nh);
                if let Some(gateway) = &gateway {
                    neigh.unbind(gateway);
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Point `prefix` at `nh`, whose reference the caller already holds.
    /// On error the reference is given back.
    fn install(&mut self, prefix: IpNet, nh: NextHopId) -> Result<(), TableError> {
        if let Err(e) = self.update_lpm(prefix, Some(nh)) {
            self.put_nexthop(nh)?;
            return Err(e);
        }
        if let Some(old) = self.routes.insert(prefix, nh) {
            self.put_nexthop(old)?;
        }
        debug!(%prefix, %nh, "LPM entry installed");
        Ok(())
    }

    /// Install `prefix` via `gateway` on interface `ifindex`.
    ///
    /// A new next hop starts out unresolved; [`RouteManager::set_neighbour`]
    /// makes it reachable.
    pub fn add_route(
        &mut self,
        prefix: IpNet,
        gateway: IpAddr,
        ifindex: u16,
    ) -> Result<NextHopId, TableError> {
        if usize::from(ifindex) >= ROUTE_MAX_LINK {
            return Err(TableError::InvalidIfindex(ifindex));
        }
        if prefix.addr().is_ipv4() != gateway.is_ipv4() {
            return Err(TableError::InvalidPrefix(prefix));
        }

        let (nh, new) = self.nexthops.acquire(gateway, ifindex)?;
        if new {
            let installed = self.update_neigh(|neigh| {
                neigh.bind(gateway, nh)?;
                neigh.set(nh, Neighbour::Unresolved { if_out: ifindex })
            });
            if let Err(e) = installed {
                self.nexthops.release(nh)?;
                return Err(e);
            }
        }

        self.install(prefix.trunc(), nh)?;
        info!(%prefix, %gateway, ifindex, %nh, "Route added");
        Ok(nh)
    }

    /// Point `prefix` at neighbour slot `nh` by id.
    ///
    /// The route holds a reference on the slot like any gateway route, so
    /// the allocator will not hand the slot to a new gateway while it is in
    /// use. The slot's contents are set with
    /// [`RouteManager::set_neighbour_slot`].
    pub fn add_route_nh(&mut self, prefix: IpNet, nh: NextHopId) -> Result<(), TableError> {
        if nh != NextHopId::LOCAL {
            self.nexthops.hold(nh)?;
        }
        self.install(prefix.trunc(), nh)
    }

    pub fn del_route(&mut self, prefix: IpNet) -> Result<(), TableError> {
        let prefix = prefix.trunc();
        let nh = self
            .routes
            .get(&prefix)
            .copied()
            .ok_or(TableError::NotFound(prefix))?;

        self.update_lpm(prefix, None)?;
        self.routes.remove(&prefix);
        self.put_nexthop(nh)?;
        info!(%prefix, "Route deleted");
        Ok(())
    }

    /// Resolver update: `addr` on `ifindex` answers at `mac`. `src` is the
    /// egress port's own MAC.
    pub fn set_neighbour(
        &mut self,
        addr: IpAddr,
        ifindex: u16,
        mac: EthernetAddress,
        src: EthernetAddress,
    ) -> Result<NextHopId, TableError> {
        let nh = self
            .nexthops
            .find(addr, ifindex)
            .ok_or(TableError::UnknownNeighbour(addr))?;
        self.set_neighbour_slot(nh, Neighbour::reachable(ifindex, mac, src, addr))?;
        info!(%addr, ifindex, %mac, %nh, "Neighbour reachable");
        Ok(nh)
    }

    /// Resolver update: `addr` on `ifindex` lost its link-layer address.
    pub fn set_unresolved(&mut self, addr: IpAddr, ifindex: u16) -> Result<NextHopId, TableError> {
        let nh = self
            .nexthops
            .find(addr, ifindex)
            .ok_or(TableError::UnknownNeighbour(addr))?;
        self.set_neighbour_slot(nh, Neighbour::Unresolved { if_out: ifindex })?;
        info!(%addr, ifindex, %nh, "Neighbour unresolved");
        Ok(nh)
    }

    /// Overwrite a neighbour slot on every socket.
    ///
    /// Apart from the local slot, only slots some route holds can be written.
    pub fn set_neighbour_slot(&mut self, nh: NextHopId, neighbour: Neighbour) -> Result<(), TableError> {
        if nh != NextHopId::LOCAL && self.nexthops.get(nh).is_none() {
            return Err(TableError::InvalidNextHop(nh));
        }
        if let Neighbour::Reachable { if_out, .. } | Neighbour::Unresolved { if_out } = neighbour
            && usize::from(if_out) >= ROUTE_MAX_LINK
        {
            return Err(TableError::InvalidIfindex(if_out));
        }
        self.update_neigh(|neigh| neigh.set(nh, neighbour))
    }

    /// Deliver packets for `addr` to the forwarder itself.
    pub fn add_local(&mut self, addr: IpAddr) -> Result<(), TableError> {
        let prefix = match addr {
            IpAddr::V4(a) => IpNet::V4(Ipv4Net::from(a)),
            IpAddr::V6(a) => IpNet::V6(Ipv6Net::from(a)),
        };
        self.add_route_nh(prefix, NextHopId::LOCAL)?;
        info!(%addr, "Local address added");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcore::{LcoreConfig, Topology};
    use crate::routing::tables::TableLimits;

    const GW_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0xbb]);
    const PORT_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0xaa]);

    fn manager() -> RouteManager {
        let mut tables = RouteTables::new(TableLimits {
            max_lpm_rules: 4,
            max_next_hops: 4,
            ..Default::default()
        });
        tables
            .init(&Topology::new(vec![
                LcoreConfig { id: 0, socket: 0 },
                LcoreConfig { id: 1, socket: 1 },
            ]))
            .unwrap();
        RouteManager::new(Arc::new(tables))
    }

    fn lookup4(mgr: &RouteManager, socket: usize, addr: &str) -> Option<NextHopId> {
        mgr.tables()
            .lpm(socket)
            .unwrap()
            .v4
            .load()
            .lookup(addr.parse().unwrap())
    }

    fn neigh(mgr: &RouteManager, socket: usize, nh: NextHopId) -> Option<Neighbour> {
        mgr.tables().neigh(socket).unwrap().load().get(nh).copied()
    }

    #[test]
    fn test_route_reaches_every_socket() {
        let mut mgr = manager();
        let nh = mgr
            .add_route("10.0.0.0/24".parse().unwrap(), "192.0.2.1".parse().unwrap(), 1)
            .unwrap();

        for socket in [0, 1] {
            assert_eq!(lookup4(&mgr, socket, "10.0.0.5"), Some(nh));
            assert_eq!(
                neigh(&mgr, socket, nh),
                Some(Neighbour::Unresolved { if_out: 1 })
            );
        }
    }

    #[test]
    fn test_neighbour_resolution() {
        let mut mgr = manager();
        let gw: IpAddr = "192.0.2.1".parse().unwrap();
        let nh = mgr.add_route("10.0.0.0/24".parse().unwrap(), gw, 1).unwrap();

        mgr.set_neighbour(gw, 1, GW_MAC, PORT_MAC).unwrap();
        assert_eq!(
            neigh(&mgr, 1, nh),
            Some(Neighbour::reachable(1, GW_MAC, PORT_MAC, gw))
        );

        mgr.set_unresolved(gw, 1).unwrap();
        assert_eq!(
            neigh(&mgr, 0, nh),
            Some(Neighbour::Unresolved { if_out: 1 })
        );

        assert_eq!(
            mgr.set_neighbour("192.0.2.9".parse().unwrap(), 1, GW_MAC, PORT_MAC),
            Err(TableError::UnknownNeighbour("192.0.2.9".parse().unwrap()))
        );
    }

    #[test]
    fn test_delete_frees_next_hop() {
        let mut mgr = manager();
        let gw: IpAddr = "192.0.2.1".parse().unwrap();
        let a = mgr.add_route("10.0.0.0/24".parse().unwrap(), gw, 1).unwrap();
        let b = mgr.add_route("10.0.1.0/24".parse().unwrap(), gw, 1).unwrap();
        assert_eq!(a, b);

        mgr.del_route("10.0.0.0/24".parse().unwrap()).unwrap();
        assert!(neigh(&mgr, 0, a).is_some());
        assert_eq!(lookup4(&mgr, 0, "10.0.0.5"), None);

        mgr.del_route("10.0.1.0/24".parse().unwrap()).unwrap();
        assert!(neigh(&mgr, 0, a).is_none());
        assert!(mgr.nexthops().is_empty());

        assert_eq!(
            mgr.del_route("10.0.1.0/24".parse().unwrap()),
            Err(TableError::NotFound("10.0.1.0/24".parse().unwrap()))
        );
    }

    #[test]
    fn test_full_table_rolls_back() {
        let mut mgr = manager();
        for i in 0..4 {
            mgr.add_route(
                format!("10.0.{i}.0/24").parse().unwrap(),
                "192.0.2.1".parse().unwrap(),
                1,
            )
            .unwrap();
        }
        assert_eq!(
            mgr.add_route(
                "10.0.9.0/24".parse().unwrap(),
                "192.0.2.2".parse().unwrap(),
                1
            ),
            Err(TableError::Full("lpm"))
        );
        // the next hop allocated for the failed route was given back
        assert_eq!(mgr.nexthops().len(), 1);
        assert_eq!(lookup4(&mgr, 1, "10.0.9.1"), None);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let mut mgr = manager();
        assert_eq!(
            mgr.add_route(
                "10.0.0.0/24".parse().unwrap(),
                "192.0.2.1".parse().unwrap(),
                ROUTE_MAX_LINK as u16
            ),
            Err(TableError::InvalidIfindex(ROUTE_MAX_LINK as u16))
        );
        assert!(matches!(
            mgr.add_route("10.0.0.0/24".parse().unwrap(), "fe80::1".parse().unwrap(), 1),
            Err(TableError::InvalidPrefix(_))
        ));
        assert_eq!(
            mgr.add_route_nh("10.0.0.0/24".parse().unwrap(), NextHopId(4)),
            Err(TableError::InvalidNextHop(NextHopId(4)))
        );
    }

    #[test]
    fn test_local_address() {
        let mut mgr = manager();
        mgr.add_local("10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(lookup4(&mgr, 0, "10.0.0.1"), Some(NextHopId::LOCAL));
        assert_eq!(neigh(&mgr, 0, NextHopId::LOCAL), Some(Neighbour::Local));
        assert_eq!(lookup4(&mgr, 0, "10.0.0.2"), None);
    }

    #[test]
    fn test_slot_claimed_by_id_is_not_reallocated() {
        let mut mgr = manager();
        let hdr = Neighbour::reachable(1, GW_MAC, PORT_MAC, "192.0.2.9".parse().unwrap());
        mgr.add_route_nh("10.0.0.0/24".parse().unwrap(), NextHopId(1))
            .unwrap();
        mgr.set_neighbour_slot(NextHopId(1), hdr).unwrap();

        let nh = mgr
            .add_route("10.9.0.0/24".parse().unwrap(), "192.0.2.1".parse().unwrap(), 2)
            .unwrap();
        assert_ne!(nh, NextHopId(1));
        for socket in [0, 1] {
            assert_eq!(neigh(&mgr, socket, NextHopId(1)), Some(hdr));
        }

        // the slot is released with its last route
        mgr.del_route("10.0.0.0/24".parse().unwrap()).unwrap();
        assert_eq!(neigh(&mgr, 0, NextHopId(1)), None);
        assert_eq!(
            mgr.set_neighbour_slot(NextHopId(1), hdr),
            Err(TableError::InvalidNextHop(NextHopId(1)))
        );
    }

    #[test]
    fn test_route_by_id_keeps_gateway_slot_alive() {
        let mut mgr = manager();
        let gw: IpAddr = "192.0.2.1".parse().unwrap();
        let nh = mgr.add_route("10.0.0.0/24".parse().unwrap(), gw, 1).unwrap();
        mgr.add_route_nh("10.1.0.0/24".parse().unwrap(), nh).unwrap();
        assert_eq!(mgr.nexthops().get(nh).unwrap().users(), 2);

        mgr.del_route("10.1.0.0/24".parse().unwrap()).unwrap();
        assert_eq!(lookup4(&mgr, 0, "10.0.0.5"), Some(nh));
        assert_eq!(
            neigh(&mgr, 0, nh),
            Some(Neighbour::Unresolved { if_out: 1 })
        );
        // still resolvable by address
        assert_eq!(mgr.set_neighbour(gw, 1, GW_MAC, PORT_MAC), Ok(nh));

        mgr.del_route("10.0.0.0/24".parse().unwrap()).unwrap();
        assert!(mgr.nexthops().is_empty());
    }

    #[test]
    fn test_replacing_route_keeps_counts() {
        let mut mgr = manager();
        let gw: IpAddr = "192.0.2.1".parse().unwrap();
        let nh = mgr.add_route("10.0.0.0/24".parse().unwrap(), gw, 1).unwrap();
        mgr.add_route("10.0.0.0/24".parse().unwrap(), gw, 1).unwrap();
        assert_eq!(mgr.nexthops().get(nh).unwrap().users(), 1);

        mgr.add_route_nh("10.0.0.0/24".parse().unwrap(), NextHopId(3))
            .unwrap();
        assert!(mgr.nexthops().get(nh).is_none());
        assert_eq!(neigh(&mgr, 0, nh), None);
    }
}

//! Neighbour table
//!
//! One slot per next hop, holding everything the forwarding path needs to
//! finish a packet: whether the next hop is the forwarder itself, and if not,
//! the egress interface and the precomputed Ethernet header. An address index
//! maps gateway addresses back to their slot for the resolver.

use std::collections::HashMap;
use std::collections::TryReserveError;
use std::net::IpAddr;

use smoltcp::wire::{EthernetAddress, EthernetProtocol};

use super::{NextHopId, TableError};
use crate::mbuf::ETHER_HDR_LEN;

/// Resolution state of a next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbour {
    /// Addressed to this forwarder.
    Local,
    /// Link-layer address known; `hdr` replaces the frame's Ethernet header.
    Reachable {
        if_out: u16,
        hdr: [u8; ETHER_HDR_LEN],
    },
    /// Waiting for address resolution on `if_out`.
    Unresolved { if_out: u16 },
}

impl Neighbour {
    /// A reachable neighbour with the rewrite header built from its MAC, the
    /// egress port MAC and the gateway's address family.
    pub fn reachable(if_out: u16, dst: EthernetAddress, src: EthernetAddress, gateway: IpAddr) -> Self {
        let ethertype = match gateway {
            IpAddr::V4(_) => EthernetProtocol::Ipv4,
            IpAddr::V6(_) => EthernetProtocol::Ipv6,
        };
        let mut hdr = [0u8; ETHER_HDR_LEN];
        hdr[0..6].copy_from_slice(dst.as_bytes());
        hdr[6..12].copy_from_slice(src.as_bytes());
        hdr[12..14].copy_from_slice(&u16::from(ethertype).to_be_bytes());
        Neighbour::Reachable { if_out, hdr }
    }
}

#[derive(Debug, Clone)]
pub struct NeighTable {
    slots: Vec<Option<Neighbour>>,
    by_addr: HashMap<IpAddr, NextHopId>,
    max_entries: usize,
}

impl NeighTable {
    /// Allocate `slots` next-hop slots and an index for up to `entries`
    /// addresses. Slot 0 is pre-set to [`Neighbour::Local`].
    pub fn try_new(slots: usize, entries: usize) -> Result<Self, TryReserveError> {
        let mut table = Vec::new();
        table.try_reserve_exact(slots)?;
        table.resize(slots, None);
        if let Some(local) = table.get_mut(NextHopId::LOCAL.index()) {
            *local = Some(Neighbour::Local);
        }

        let mut by_addr = HashMap::new();
        by_addr.try_reserve(entries)?;

        Ok(Self {
            slots: table,
            by_addr,
            max_entries: entries,
        })
    }

    pub fn get(&self, id: NextHopId) -> Option<&Neighbour> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn set(&mut self, id: NextHopId, neighbour: Neighbour) -> Result<(), TableError> {
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or(TableError::InvalidNextHop(id))?;
        *slot = Some(neighbour);
        Ok(())
    }

    pub fn clear(&mut self, id: NextHopId) -> Option<Neighbour> {
        self.slots.get_mut(id.index())?.take()
    }

    /// Index `addr` under `id`.
    pub fn bind(&mut self, addr: IpAddr, id: NextHopId) -> Result<(), TableError> {
        if !self.by_addr.contains_key(&addr) && self.by_addr.len() >= self.max_entries {
            return Err(TableError::Full("neighbour hash"));
        }
        self.by_addr.insert(addr, id);
        Ok(())
    }

    pub fn unbind(&mut self, addr: &IpAddr) -> Option<NextHopId> {
        self.by_addr.remove(addr)
    }

    pub fn resolve(&self, addr: &IpAddr) -> Option<NextHopId> {
        self.by_addr.get(addr).copied()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of indexed addresses.
    pub fn entries(&self) -> usize {
        self.by_addr.len()
    }
}

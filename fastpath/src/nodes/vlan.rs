//! 802.1Q VLAN node
//!
//! Ingress removes the tag and forwards the untagged frame to the bridge;
//! egress inserts the tag and forwards to the Ethernet port.

use std::any::Any;

use crate::graph::DropReason;
use crate::lcore::Lcore;
use crate::mbuf::{ETHER_ADDRS_LEN, ETHER_HDR_LEN, ETHER_TYPE_VLAN, PacketBuf, VLAN_HDR_LEN};
use crate::module::{
    ConnectError, ConnectParam, Direction, Module, ModuleId, ModuleType, PeerInfo, Propagation,
};

/// Highest configurable vid.
pub const VLAN_VID_MAX: u16 = 4094;

/// Vid bits of the TCI.
pub const VLAN_VID_MASK: u16 = 0x0fff;

pub struct VlanModule {
    name: String,
    vid: u16,
    ethernet: Option<ModuleId>,
    bridge: Option<ModuleId>,
}

impl VlanModule {
    pub fn new(vid: u16) -> Result<Self, ConnectError> {
        if vid > VLAN_VID_MAX {
            return Err(ConnectError::InvalidVid(vid));
        }
        Ok(Self {
            name: format!("vlan{vid}"),
            vid,
            ethernet: None,
            bridge: None,
        })
    }

    pub fn ethernet(&self) -> Option<ModuleId> {
        self.ethernet
    }

    pub fn bridge(&self) -> Option<ModuleId> {
        self.bridge
    }

    /// Point egress at `eth` without going through the connect protocol.
    pub fn set_ethernet(&mut self, eth: ModuleId) {
        self.ethernet = Some(eth);
    }
}

/// Strip the tag at the head and rebuild an untagged Ethernet header in the
/// headroom. On return the head is at the encapsulated payload.
pub fn pop_tag(m: &mut PacketBuf) -> Result<(), DropReason> {
    if m.len() < VLAN_HDR_LEN {
        return Err(DropReason::Malformed);
    }
    if m.headroom() < ETHER_HDR_LEN {
        return Err(DropReason::NoHeadroom);
    }

    m.adj(VLAN_HDR_LEN);
    // dst+src sit 4 bytes too far back; move them up against the inner ethertype
    let hdr = m
        .before_mut(ETHER_HDR_LEN + VLAN_HDR_LEN)
        .ok_or(DropReason::NoHeadroom)?;
    hdr.copy_within(0..ETHER_ADDRS_LEN, VLAN_HDR_LEN);
    Ok(())
}

/// Insert a tag carrying `vid` into the Ethernet frame at the head.
pub fn push_tag(m: &mut PacketBuf, vid: u16) -> Result<(), DropReason> {
    if m.len() < ETHER_HDR_LEN {
        return Err(DropReason::Malformed);
    }

    m.prepend(VLAN_HDR_LEN).ok_or(DropReason::NoHeadroom)?;
    let frame = m.data_mut();
    frame.copy_within(VLAN_HDR_LEN..VLAN_HDR_LEN + ETHER_ADDRS_LEN, 0);
    frame[12..14].copy_from_slice(&ETHER_TYPE_VLAN.to_be_bytes());
    frame[14..16].copy_from_slice(&(vid & VLAN_VID_MASK).to_be_bytes());
    Ok(())
}

/// Vid of the tagged Ethernet frame at the head of `frame`.
pub fn tagged_vid(frame: &[u8]) -> Option<u16> {
    if frame.len() < ETHER_HDR_LEN + 2 || frame[12..14] != ETHER_TYPE_VLAN.to_be_bytes() {
        return None;
    }
    Some(u16::from_be_bytes([frame[14], frame[15]]) & VLAN_VID_MASK)
}

/// Remove the tag from the tagged Ethernet frame at the head.
pub fn strip_tag(m: &mut PacketBuf) -> Result<(), DropReason> {
    if m.len() < ETHER_HDR_LEN + VLAN_HDR_LEN {
        return Err(DropReason::Malformed);
    }
    m.data_mut()
        .copy_within(0..ETHER_ADDRS_LEN, VLAN_HDR_LEN);
    m.adj(VLAN_HDR_LEN);
    Ok(())
}

impl Module for VlanModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleType {
        ModuleType::Vlan
    }

    fn vid(&self) -> Option<u16> {
        Some(self.vid)
    }

    fn receive(&self, lc: &Lcore<'_>, mut m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        if let Err(reason) = pop_tag(&mut m) {
            lc.drop_pkt(m, me, reason);
            return;
        }
        lc.send(m, me, self.bridge, Direction::Recv);
    }

    fn transmit(&self, lc: &Lcore<'_>, mut m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        if let Err(reason) = push_tag(&mut m, self.vid) {
            lc.drop_pkt(m, me, reason);
            return;
        }
        lc.send(m, me, self.ethernet, Direction::Xmit);
    }

    fn check_peer(
        &self,
        peer: &PeerInfo,
        _param: ConnectParam,
    ) -> Result<Propagation, ConnectError> {
        match peer.kind {
            ModuleType::Bridge => Ok(Propagation::OneWay),
            ModuleType::Ethernet => Ok(Propagation::Mutual),
            other => Err(ConnectError::InvalidPeer {
                local: self.name.clone(),
                peer: other,
            }),
        }
    }

    fn attach(&mut self, peer: &PeerInfo, _param: ConnectParam) {
        match peer.kind {
            ModuleType::Bridge => self.bridge = Some(peer.id),
            ModuleType::Ethernet => self.ethernet = Some(peer.id),
            _ => {}
        }
    }

    fn peers(&self) -> Vec<ModuleId> {
        self.ethernet.into_iter().chain(self.bridge).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

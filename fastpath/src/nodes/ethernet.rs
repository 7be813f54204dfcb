//! Ethernet port node
//!
//! Sits on top of an interface and demultiplexes frames: tagged frames go to
//! the VLAN module registered for their vid, untagged frames go to the
//! bridge. On a trunk with a native vid, untagged frames belong to that
//! VLAN instead, and its frames leave the port untagged. Egress frames arrive
//! complete and are handed to the interface.

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smoltcp::wire::EthernetFrame;

use crate::graph::DropReason;
use crate::lcore::Lcore;
use crate::mbuf::{ETHER_HDR_LEN, ETHER_TYPE_VLAN, PacketBuf};
use crate::module::{
    ConnectError, ConnectParam, Direction, Module, ModuleId, ModuleType, PeerInfo, Propagation,
};
use crate::nodes::vlan::{VLAN_VID_MASK, push_tag, strip_tag, tagged_vid};

/// How a port treats 802.1Q tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanMode {
    /// Untagged traffic only; tagged frames are dropped.
    #[default]
    Access,
    /// Tagged traffic is dispatched per vid.
    Trunk,
}

pub struct EthernetModule {
    name: String,
    port: u16,
    mode: VlanMode,
    native: u16,
    interface: Option<ModuleId>,
    bridge: Option<ModuleId>,
    vlans: HashMap<u16, ModuleId>,
}

impl EthernetModule {
    pub fn new(port: u16, mode: VlanMode, native: u16) -> Self {
        Self {
            name: format!("eth{port}"),
            port,
            mode,
            native,
            interface: None,
            bridge: None,
            vlans: HashMap::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn mode(&self) -> VlanMode {
        self.mode
    }

    pub fn native(&self) -> u16 {
        self.native
    }

    pub fn vlan(&self, vid: u16) -> Option<ModuleId> {
        self.vlans.get(&vid).copied()
    }

    /// VLAN carrying untagged traffic on a trunk. Vid 0 means none.
    fn native_vlan(&self) -> Option<ModuleId> {
        if self.mode != VlanMode::Trunk || self.native == 0 {
            return None;
        }
        self.vlan(self.native)
    }
}

impl Module for EthernetModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleType {
        ModuleType::Ethernet
    }

    fn ifindex(&self) -> u16 {
        self.port
    }

    fn receive(&self, lc: &Lcore<'_>, mut m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        let (ethertype, tci) = match EthernetFrame::new_checked(m.data()) {
            Ok(frame) => {
                let payload = frame.payload();
                let tci = (payload.len() >= 2).then(|| u16::from_be_bytes([payload[0], payload[1]]));
                (u16::from(frame.ethertype()), tci)
            }
            Err(_) => {
                lc.drop_pkt(m, me, DropReason::Malformed);
                return;
            }
        };

        if ethertype != ETHER_TYPE_VLAN {
            if let Some(vlan) = self.native_vlan() {
                // tag it so the VLAN module sees the same layout as a tagged frame
                if let Err(reason) = push_tag(&mut m, self.native) {
                    lc.drop_pkt(m, me, reason);
                    return;
                }
                m.adj(ETHER_HDR_LEN);
                lc.send(m, me, Some(vlan), Direction::Recv);
                return;
            }
            m.adj(ETHER_HDR_LEN);
            lc.send(m, me, self.bridge, Direction::Recv);
            return;
        }

        if self.mode == VlanMode::Access {
            lc.drop_pkt(m, me, DropReason::TaggedOnAccess);
            return;
        }

        let Some(tci) = tci else {
            lc.drop_pkt(m, me, DropReason::Malformed);
            return;
        };
        let Some(vlan) = self.vlan(tci & VLAN_VID_MASK) else {
            lc.drop_pkt(m, me, DropReason::UnknownVlan);
            return;
        };

        // The VLAN module expects the head at the tag.
        m.adj(ETHER_HDR_LEN);
        lc.send(m, me, Some(vlan), Direction::Recv);
    }

    fn transmit(&self, lc: &Lcore<'_>, mut m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        if self.native_vlan().is_some()
            && tagged_vid(m.data()) == Some(self.native)
            && let Err(reason) = strip_tag(&mut m)
        {
            lc.drop_pkt(m, me, reason);
            return;
        }
        lc.send(m, me, self.interface, Direction::Xmit);
    }

    fn check_peer(
        &self,
        peer: &PeerInfo,
        _param: ConnectParam,
    ) -> Result<Propagation, ConnectError> {
        match peer.kind {
            ModuleType::Interface => Ok(Propagation::Mutual),
            ModuleType::Vlan if peer.vid.is_some() => Ok(Propagation::OneWay),
            ModuleType::Bridge => Ok(Propagation::OneWay),
            other => Err(ConnectError::InvalidPeer {
                local: self.name.clone(),
                peer: other,
            }),
        }
    }

    fn attach(&mut self, peer: &PeerInfo, _param: ConnectParam) {
        match peer.kind {
            ModuleType::Interface => self.interface = Some(peer.id),
            ModuleType::Bridge => self.bridge = Some(peer.id),
            ModuleType::Vlan => {
                if let Some(vid) = peer.vid {
                    self.vlans.insert(vid, peer.id);
                }
            }
            _ => {}
        }
    }

    fn peers(&self) -> Vec<ModuleId> {
        let mut peers: Vec<_> = self.interface.into_iter().chain(self.bridge).collect();
        peers.extend(self.vlans.values().copied());
        peers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

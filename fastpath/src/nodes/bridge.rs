//! L2 bridge node
//!
//! Frames come up from Ethernet ports and VLAN modules with the head after
//! the Ethernet header. The destination MAC is read back out of the headroom
//! and looked up in a static forwarding database.

use std::any::Any;
use std::collections::HashMap;

use smoltcp::wire::EthernetAddress;
use thiserror::Error;

use crate::graph::DropReason;
use crate::lcore::Lcore;
use crate::mbuf::{ETHER_HDR_LEN, PacketBuf};
use crate::module::{
    ConnectError, ConnectParam, Direction, Module, ModuleId, ModuleType, PeerInfo, Propagation,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FdbError {
    #[error("{0} is not a port of this bridge")]
    NotAPort(ModuleId),

    #[error("{0} is not a unicast address")]
    NotUnicast(EthernetAddress),
}

pub struct BridgeModule {
    name: String,
    ports: Vec<ModuleId>,
    fdb: HashMap<EthernetAddress, ModuleId>,
}

impl BridgeModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
            fdb: HashMap::new(),
        }
    }

    pub fn ports(&self) -> &[ModuleId] {
        &self.ports
    }

    /// Pin `mac` to `port`.
    pub fn add_fdb(&mut self, mac: EthernetAddress, port: ModuleId) -> Result<(), FdbError> {
        if !mac.is_unicast() {
            return Err(FdbError::NotUnicast(mac));
        }
        if !self.ports.contains(&port) {
            return Err(FdbError::NotAPort(port));
        }
        self.fdb.insert(mac, port);
        Ok(())
    }

    pub fn lookup(&self, mac: &EthernetAddress) -> Option<ModuleId> {
        self.fdb.get(mac).copied()
    }

    /// Ports a frame for `dst` received on `sender` goes out of.
    fn targets(&self, dst: &EthernetAddress, sender: ModuleId) -> Vec<ModuleId> {
        if let Some(port) = self.lookup(dst)
            && port != sender
        {
            return vec![port];
        }
        self.ports
            .iter()
            .copied()
            .filter(|p| *p != sender)
            .collect()
    }
}

impl Module for BridgeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleType {
        ModuleType::Bridge
    }

    fn receive(&self, lc: &Lcore<'_>, mut m: PacketBuf, sender: ModuleId, me: ModuleId) {
        let Some(dst) = m
            .before(ETHER_HDR_LEN)
            .map(|hdr| EthernetAddress::from_bytes(&hdr[..6]))
        else {
            lc.drop_pkt(m, me, DropReason::Malformed);
            return;
        };

        if m.prepend(ETHER_HDR_LEN).is_none() {
            lc.drop_pkt(m, me, DropReason::NoHeadroom);
            return;
        }

        let targets = self.targets(&dst, sender);
        let Some((last, rest)) = targets.split_last() else {
            lc.drop_pkt(m, me, DropReason::NoPeer);
            return;
        };

        for port in rest {
            lc.send(m.clone(), me, Some(*port), Direction::Xmit);
        }
        lc.send(m, me, Some(*last), Direction::Xmit);
    }

    fn transmit(&self, lc: &Lcore<'_>, m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        lc.drop_pkt(m, me, DropReason::XmitUnsupported);
    }

    fn check_peer(
        &self,
        peer: &PeerInfo,
        _param: ConnectParam,
    ) -> Result<Propagation, ConnectError> {
        match peer.kind {
            ModuleType::Vlan | ModuleType::Ethernet => Ok(Propagation::Mutual),
            other => Err(ConnectError::InvalidPeer {
                local: self.name.clone(),
                peer: other,
            }),
        }
    }

    fn attach(&mut self, peer: &PeerInfo, _param: ConnectParam) {
        if !self.ports.contains(&peer.id) {
            self.ports.push(peer.id);
        }
    }

    fn peers(&self) -> Vec<ModuleId> {
        self.ports.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

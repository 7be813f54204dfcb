//! Physical interface node
//!
//! The bottom of every pipeline. Ingress buffers come from the NIC driver
//! through [`Graph::input`](crate::graph::Graph::input); egress buffers are
//! complete Ethernet frames pushed onto the port's TX queue.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Sender, TrySendError};
use smoltcp::wire::EthernetAddress;

use crate::graph::DropReason;
use crate::lcore::Lcore;
use crate::mbuf::{ETHER_HDR_LEN, PacketBuf};
use crate::module::{
    ConnectError, ConnectParam, Direction, EntryPoints, Module, ModuleId, ModuleType, PeerInfo,
    Propagation,
};

pub struct InterfaceModule {
    name: String,
    ifindex: u16,
    mac: EthernetAddress,
    tx: Option<Sender<PacketBuf>>,
    upper: Option<(ModuleId, ModuleType)>,
    sent: AtomicU64,
}

impl InterfaceModule {
    /// Create a port whose frames are handed to `tx`.
    pub fn new(name: impl Into<String>, ifindex: u16, mac: [u8; 6], tx: Sender<PacketBuf>) -> Self {
        Self {
            name: name.into(),
            ifindex,
            mac: EthernetAddress(mac),
            tx: Some(tx),
            upper: None,
            sent: AtomicU64::new(0),
        }
    }

    /// Create a receive-only port. Its transmit entry point is not installed.
    pub fn rx_only(name: impl Into<String>, ifindex: u16, mac: [u8; 6]) -> Self {
        Self {
            name: name.into(),
            ifindex,
            mac: EthernetAddress(mac),
            tx: None,
            upper: None,
            sent: AtomicU64::new(0),
        }
    }

    pub fn mac(&self) -> EthernetAddress {
        self.mac
    }

    /// Frames successfully queued for the wire.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn upper(&self) -> Option<ModuleId> {
        self.upper.map(|(id, _)| id)
    }
}

impl Module for InterfaceModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleType {
        ModuleType::Interface
    }

    fn ifindex(&self) -> u16 {
        self.ifindex
    }

    fn entry_points(&self) -> EntryPoints {
        EntryPoints {
            receive: true,
            transmit: self.tx.is_some(),
        }
    }

    fn receive(&self, lc: &Lcore<'_>, mut m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        m.classify();

        // An L3 upper layer expects the head at the IP header.
        if let Some((_, ModuleType::Route)) = self.upper
            && m.adj(ETHER_HDR_LEN).is_none()
        {
            lc.drop_pkt(m, me, DropReason::Malformed);
            return;
        }

        lc.send(m, me, self.upper(), Direction::Recv);
    }

    fn transmit(&self, lc: &Lcore<'_>, m: PacketBuf, _sender: ModuleId, me: ModuleId) {
        let Some(tx) = &self.tx else {
            lc.drop_pkt(m, me, DropReason::NoEntryPoint);
            return;
        };

        match tx.try_send(m) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(m)) | Err(TrySendError::Disconnected(m)) => {
                lc.drop_pkt(m, me, DropReason::TxQueueFull);
            }
        }
    }

    fn check_peer(
        &self,
        peer: &PeerInfo,
        _param: ConnectParam,
    ) -> Result<Propagation, ConnectError> {
        match peer.kind {
            ModuleType::Ethernet => Ok(Propagation::Mutual),
            ModuleType::Route => Ok(Propagation::OneWay),
            other => Err(ConnectError::InvalidPeer {
                local: self.name.clone(),
                peer: other,
            }),
        }
    }

    fn attach(&mut self, peer: &PeerInfo, _param: ConnectParam) {
        self.upper = Some((peer.id, peer.kind));
    }

    fn peers(&self) -> Vec<ModuleId> {
        self.upper().into_iter().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

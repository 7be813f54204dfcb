//! Module graph and connect protocol
//!
//! The graph is an arena of modules addressed by [`ModuleId`]. Peers are
//! registered mutually (both ends hold the other's id), so the graph may be
//! cyclic without any ownership cycle. Wiring happens once, single-threaded,
//! before the graph is shared with the forwarding threads; afterwards it is
//! only read.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info, warn};

use crate::lcore::Lcore;
use crate::mbuf::PacketBuf;
use crate::module::{
    ConnectError, ConnectParam, Direction, Module, ModuleId, PeerInfo, Propagation, check_name,
};

/// Why a buffer was released on the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Dispatch target is not wired.
    NoPeer,
    /// Dispatch target lacks the requested entry point.
    NoEntryPoint,
    /// Neither IPv4 nor IPv6 classification flag is set.
    UnsupportedProtocol,
    /// Header too short or otherwise unparsable.
    Malformed,
    /// No prefix matched the destination.
    RouteMiss,
    /// The route points at an empty neighbour slot.
    NoNextHop,
    /// Packet addressed to the forwarder itself.
    LocalDelivery,
    /// Next hop has no link-layer address yet.
    Unresolved,
    /// Tagged frame arrived on an access port.
    TaggedOnAccess,
    /// No VLAN module for the frame's vid.
    UnknownVlan,
    /// Not enough headroom to push a header.
    NoHeadroom,
    /// Egress through a module with no egress protocol.
    XmitUnsupported,
    /// Interface TX queue closed or full.
    TxQueueFull,
    /// No lookup tables for the forwarding core's socket.
    NoTable,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NoPeer => "peer not valid",
            DropReason::NoEntryPoint => "peer entry point not valid",
            DropReason::UnsupportedProtocol => "unsupported protocol",
            DropReason::Malformed => "malformed packet",
            DropReason::RouteMiss => "no route",
            DropReason::NoNextHop => "no such next hop",
            DropReason::LocalDelivery => "local delivery will be supported later",
            DropReason::Unresolved => "next hop unresolved",
            DropReason::TaggedOnAccess => "tagged frame on access port",
            DropReason::UnknownVlan => "unknown vlan",
            DropReason::NoHeadroom => "no headroom",
            DropReason::XmitUnsupported => "no protocol installed for egress",
            DropReason::TxQueueFull => "tx queue full",
            DropReason::NoTable => "no lookup table for socket",
        }
    }
}

/// Per-module packet counters.
#[derive(Debug, Default)]
pub struct NodeStats {
    received: AtomicU64,
    transmitted: AtomicU64,
    dropped: AtomicU64,
}

impl NodeStats {
    /// Buffers handed to the module's `receive`.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Buffers handed to the module's `transmit`.
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }

    /// Buffers released by the module.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Node {
    module: Box<dyn Module>,
    stats: NodeStats,
}

/// Arena of pipeline modules.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the arena.
    pub fn add(&mut self, module: impl Module) -> Result<ModuleId, ConnectError> {
        check_name(module.name())?;
        let id = ModuleId(self.nodes.len());
        debug!(id = %id, name = module.name(), kind = %module.kind(), "Adding module");
        self.nodes.push(Node {
            module: Box::new(module),
            stats: NodeStats::default(),
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        (0..self.nodes.len()).map(ModuleId)
    }

    pub fn module(&self, id: ModuleId) -> Option<&dyn Module> {
        self.nodes.get(id.0).map(|n| n.module.as_ref())
    }

    /// Typed access to a module.
    pub fn get<T: Module>(&self, id: ModuleId) -> Option<&T> {
        self.nodes.get(id.0)?.module.as_any().downcast_ref()
    }

    /// Typed mutable access, for configuration-time setters.
    pub fn get_mut<T: Module>(&mut self, id: ModuleId) -> Option<&mut T> {
        self.nodes.get_mut(id.0)?.module.as_any_mut().downcast_mut()
    }

    pub fn stats(&self, id: ModuleId) -> Option<&NodeStats> {
        self.nodes.get(id.0).map(|n| &n.stats)
    }

    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.nodes
            .iter()
            .position(|n| n.module.name() == name)
            .map(ModuleId)
    }

    pub fn peer_info(&self, id: ModuleId) -> Option<PeerInfo> {
        let module = self.module(id)?;
        Some(PeerInfo {
            id,
            kind: module.kind(),
            name: module.name().to_string(),
            ifindex: module.ifindex(),
            vid: module.vid(),
        })
    }

    /// Whether `from` holds a reference to `to`.
    pub fn is_linked(&self, from: ModuleId, to: ModuleId) -> bool {
        self.module(from)
            .map(|m| m.peers().contains(&to))
            .unwrap_or(false)
    }

    /// Link `local` to `peer`.
    ///
    /// The local module's policy decides whether `peer` is acceptable and
    /// whether the peer must register `local` in turn. Both checks run before
    /// either side is mutated; the reverse registration never propagates
    /// further.
    pub fn connect(
        &mut self,
        local: ModuleId,
        peer: ModuleId,
        param: ConnectParam,
    ) -> Result<(), ConnectError> {
        let local_info = self
            .peer_info(local)
            .ok_or(ConnectError::UnknownModule(local))?;
        let peer_info = self
            .peer_info(peer)
            .ok_or(ConnectError::UnknownModule(peer))?;

        if local == peer {
            return Err(ConnectError::SelfLoop(local_info.name));
        }

        info!(local = %local_info.name, peer = %peer_info.name, "connect");

        let propagation = self.nodes[local.0]
            .module
            .check_peer(&peer_info, param)
            .inspect_err(|e| error!(local = %local_info.name, error = %e, "connect rejected"))?;

        if propagation == Propagation::Mutual {
            self.nodes[peer.0]
                .module
                .check_peer(&local_info, ConnectParam::None)
                .inspect_err(|e| {
                    error!(local = %peer_info.name, error = %e, "reverse connect rejected")
                })?;
        }

        self.nodes[local.0].module.attach(&peer_info, param);
        if propagation == Propagation::Mutual {
            self.nodes[peer.0]
                .module
                .attach(&local_info, ConnectParam::None);
        }

        Ok(())
    }

    /// Guarded dispatch: hand `m` to the `dir` entry point of `to`.
    ///
    /// A missing peer or entry point releases the buffer at `from`.
    pub fn send(
        &self,
        lc: &Lcore<'_>,
        m: PacketBuf,
        from: ModuleId,
        to: Option<ModuleId>,
        dir: Direction,
    ) {
        let Some((to, node)) = to.and_then(|id| Some((id, self.nodes.get(id.0)?))) else {
            self.drop_pkt(m, from, DropReason::NoPeer);
            return;
        };

        if !node.module.entry_points().allows(dir) {
            self.drop_pkt(m, from, DropReason::NoEntryPoint);
            return;
        }

        match dir {
            Direction::Recv => {
                node.stats.received.fetch_add(1, Ordering::Relaxed);
                node.module.receive(lc, m, from, to);
            }
            Direction::Xmit => {
                node.stats.transmitted.fetch_add(1, Ordering::Relaxed);
                node.module.transmit(lc, m, from, to);
            }
        }
    }

    /// Deliver a buffer pulled off a NIC queue to `port`'s receive entry point.
    pub fn input(&self, lc: &Lcore<'_>, m: PacketBuf, port: ModuleId) {
        self.send(lc, m, port, Some(port), Direction::Recv);
    }

    /// Release `m` at `at`.
    pub fn drop_pkt(&self, m: PacketBuf, at: ModuleId, reason: DropReason) {
        let name = self.module(at).map(|m| m.name()).unwrap_or("?");
        if let Some(node) = self.nodes.get(at.0) {
            node.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }

        match reason {
            DropReason::NoPeer
            | DropReason::NoEntryPoint
            | DropReason::XmitUnsupported
            | DropReason::UnsupportedProtocol
            | DropReason::NoTable => {
                error!(target: "fastpath::datapath", node = name, len = m.len(), "{}", reason.as_str())
            }
            DropReason::NoNextHop | DropReason::NoHeadroom => {
                warn!(target: "fastpath::datapath", node = name, len = m.len(), "{}", reason.as_str())
            }
            _ => {
                debug!(target: "fastpath::datapath", node = name, len = m.len(), "{}", reason.as_str())
            }
        }

        drop(m);
    }
}

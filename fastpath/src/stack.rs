//! Forwarding context
//!
//! [`Fastpath`] owns everything the pipeline needs: the module graph, the
//! per-vid VLAN registry, the IP forwarder and the control plane for its
//! tables. Nodes are added bottom-up (interface, ethernet, vlan, bridge,
//! route) and wired through the connect protocol. Once forwarding threads
//! are launched the graph is shared and frozen; routes and neighbours can
//! still be changed through the [`RouteManager`].

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use ipnet::IpNet;
use smoltcp::wire::EthernetAddress;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, FastpathConfig};
use crate::graph::Graph;
use crate::lcore::{self, Lcore, LcoreConfig, Topology};
use crate::mbuf::PacketBuf;
use crate::module::{ConnectError, ConnectParam, Module, ModuleId};
use crate::nodes::{
    BridgeModule, EthernetModule, FdbError, InterfaceModule, VLAN_VID_MAX, VlanMode, VlanModule,
};
use crate::routing::{
    InitError, NextHopId, RouteManager, RouteModule, RouteTables, TableError, TableLimits,
};

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Fdb(#[from] FdbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("ifindex {0} already registered")]
    DuplicateIfindex(u16),

    #[error("no interface with ifindex {0}")]
    UnknownInterface(u16),

    #[error("no ethernet port {0}")]
    UnknownPort(u16),

    #[error("no bridge named '{0}'")]
    UnknownBridge(String),

    #[error("ethernet port {0} already exists")]
    DuplicatePort(u16),

    #[error("bridge '{0}' already exists")]
    DuplicateBridge(String),

    #[error("interface {0} already has an upper layer")]
    InterfaceInUse(u16),

    #[error("graph is shared with forwarding threads")]
    Running,
}

/// Depth of the TX queues created for configured interfaces.
pub const TX_QUEUE_DEPTH: usize = 1024;

pub struct Fastpath {
    graph: Arc<Graph>,
    tx_queues: HashMap<u16, Receiver<PacketBuf>>,
    topology: Topology,
    routes: RouteManager,
    route: ModuleId,
    interfaces: HashMap<u16, ModuleId>,
    ethernets: HashMap<u16, ModuleId>,
    vlans: HashMap<u16, ModuleId>,
    bridges: HashMap<String, ModuleId>,
}

impl Fastpath {
    /// Initialise the per-socket tables for `topology` and create the IP
    /// forwarder.
    pub fn new(topology: Topology, limits: TableLimits) -> Result<Self, StackError> {
        let mut tables = RouteTables::new(limits);
        tables.init(&topology)?;
        let tables = Arc::new(tables);

        let mut graph = Graph::new();
        let route = graph.add(RouteModule::new(Arc::clone(&tables)))?;

        Ok(Self {
            graph: Arc::new(graph),
            tx_queues: HashMap::new(),
            topology,
            routes: RouteManager::new(tables),
            route,
            interfaces: HashMap::new(),
            ethernets: HashMap::new(),
            vlans: HashMap::new(),
            bridges: HashMap::new(),
        })
    }

    /// Build the full pipeline and initial routing state from `config`.
    pub fn from_config(config: &FastpathConfig) -> Result<Self, StackError> {
        config.validate()?;
        let mut fp = Self::new(config.lcores.clone(), config.limits)?;

        for iface in &config.interfaces {
            let (tx, rx) = bounded(TX_QUEUE_DEPTH);
            let id = fp.add_port(&iface.name, iface.ifindex, iface.mac, tx)?;
            fp.tx_queues.insert(iface.ifindex, rx);
            if iface.routed {
                fp.route_interface(iface.ifindex)?;
            }
            debug!(name = %iface.name, %id, "Interface configured");
        }

        for bridge in &config.bridges {
            fp.add_bridge(&bridge.name)?;
        }
        for eth in &config.ethernets {
            let id = fp.add_ethernet(eth.port, eth.mode, eth.native)?;
            if let Some(bridge) = &eth.bridge {
                fp.bridge_port(bridge, id)?;
            }
        }
        for vlan in &config.vlans {
            let id = fp.add_vlan(vlan.vid, vlan.port)?;
            if let Some(bridge) = &vlan.bridge {
                fp.bridge_port(bridge, id)?;
            }
        }

        for route in &config.routes {
            fp.add_route(route.prefix, route.gateway, route.ifindex)?;
        }
        for neigh in &config.neighbours {
            fp.set_neighbour(neigh.addr, neigh.ifindex, neigh.mac)?;
        }
        for addr in &config.local {
            fp.add_local(*addr)?;
        }

        fp.log_summary();
        Ok(fp)
    }

    /// Hand the TX queue of a configured interface to the NIC layer.
    pub fn take_tx_queue(&mut self, ifindex: u16) -> Option<Receiver<PacketBuf>> {
        self.tx_queues.remove(&ifindex)
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn routes(&self) -> &RouteManager {
        &self.routes
    }

    pub fn route_module(&self) -> ModuleId {
        self.route
    }

    pub fn interface(&self, ifindex: u16) -> Option<ModuleId> {
        self.interfaces.get(&ifindex).copied()
    }

    pub fn ethernet(&self, port: u16) -> Option<ModuleId> {
        self.ethernets.get(&port).copied()
    }

    pub fn vlan(&self, vid: u16) -> Option<ModuleId> {
        self.vlans.get(&vid).copied()
    }

    pub fn bridge(&self, name: &str) -> Option<ModuleId> {
        self.bridges.get(name).copied()
    }

    fn graph_mut(&mut self) -> Result<&mut Graph, StackError> {
        Arc::get_mut(&mut self.graph).ok_or(StackError::Running)
    }

    /// Interface `ifindex`, provided nothing sits on top of it yet.
    fn free_interface(&self, ifindex: u16) -> Result<ModuleId, StackError> {
        let iface = self
            .interface(ifindex)
            .ok_or(StackError::UnknownInterface(ifindex))?;
        let upper = self
            .graph
            .get::<InterfaceModule>(iface)
            .and_then(InterfaceModule::upper);
        if upper.is_some() {
            return Err(StackError::InterfaceInUse(ifindex));
        }
        Ok(iface)
    }

    pub fn add_interface(&mut self, iface: InterfaceModule) -> Result<ModuleId, StackError> {
        let ifindex = iface.ifindex();
        if self.interfaces.contains_key(&ifindex) {
            return Err(StackError::DuplicateIfindex(ifindex));
        }
        let id = self.graph_mut()?.add(iface)?;
        self.interfaces.insert(ifindex, id);
        Ok(id)
    }

    /// Create a receive/transmit interface feeding `tx`.
    pub fn add_port(
        &mut self,
        name: &str,
        ifindex: u16,
        mac: [u8; 6],
        tx: Sender<PacketBuf>,
    ) -> Result<ModuleId, StackError> {
        self.add_interface(InterfaceModule::new(name, ifindex, mac, tx))
    }

    /// Register interface `ifindex` with the IP forwarder.
    pub fn route_interface(&mut self, ifindex: u16) -> Result<(), StackError> {
        let iface = self.free_interface(ifindex)?;
        let route = self.route;
        self.connect(route, iface, ConnectParam::Ifindex(ifindex))
    }

    /// Put an Ethernet port on top of interface `port`.
    pub fn add_ethernet(
        &mut self,
        port: u16,
        mode: VlanMode,
        native: u16,
    ) -> Result<ModuleId, StackError> {
        if self.ethernets.contains_key(&port) {
            return Err(StackError::DuplicatePort(port));
        }
        if native > VLAN_VID_MAX {
            return Err(ConnectError::InvalidVid(native).into());
        }
        let iface = self.free_interface(port)?;
        let id = self
            .graph_mut()?
            .add(EthernetModule::new(port, mode, native))?;
        self.connect(id, iface, ConnectParam::None)?;
        self.ethernets.insert(port, id);
        Ok(id)
    }

    /// Create the VLAN context for `vid` on Ethernet port `port`.
    ///
    /// Only one context may exist per vid.
    pub fn add_vlan(&mut self, vid: u16, port: u16) -> Result<ModuleId, StackError> {
        if self.vlans.contains_key(&vid) {
            return Err(ConnectError::VidInUse(vid).into());
        }
        let eth = self.ethernet(port).ok_or(StackError::UnknownPort(port))?;
        let vlan = VlanModule::new(vid)?;

        let id = self.graph_mut()?.add(vlan)?;
        self.connect(id, eth, ConnectParam::None)?;
        self.vlans.insert(vid, id);
        Ok(id)
    }

    /// Point the egress side of VLAN `vid` at Ethernet port `port` without
    /// registering the VLAN on the port.
    pub fn vlan_set_ethernet(&mut self, vid: u16, port: u16) -> Result<(), StackError> {
        let vlan = self.vlan(vid).ok_or(ConnectError::InvalidVid(vid))?;
        let eth = self.ethernet(port).ok_or(StackError::UnknownPort(port))?;
        if let Some(module) = self.graph_mut()?.get_mut::<VlanModule>(vlan) {
            module.set_ethernet(eth);
        }
        Ok(())
    }

    pub fn add_bridge(&mut self, name: &str) -> Result<ModuleId, StackError> {
        if self.bridges.contains_key(name) {
            return Err(StackError::DuplicateBridge(name.to_string()));
        }
        let id = self.graph_mut()?.add(BridgeModule::new(name))?;
        self.bridges.insert(name.to_string(), id);
        Ok(id)
    }

    /// Make `port` (an Ethernet port or VLAN) a member of bridge `name`.
    pub fn bridge_port(&mut self, name: &str, port: ModuleId) -> Result<(), StackError> {
        let bridge = self
            .bridge(name)
            .ok_or_else(|| StackError::UnknownBridge(name.to_string()))?;
        self.connect(bridge, port, ConnectParam::None)
    }

    pub fn add_fdb(&mut self, name: &str, mac: [u8; 6], port: ModuleId) -> Result<(), StackError> {
        let bridge = self
            .bridge(name)
            .ok_or_else(|| StackError::UnknownBridge(name.to_string()))?;
        if let Some(module) = self.graph_mut()?.get_mut::<BridgeModule>(bridge) {
            module.add_fdb(EthernetAddress(mac), port)?;
        }
        Ok(())
    }

    pub fn connect(
        &mut self,
        local: ModuleId,
        peer: ModuleId,
        param: ConnectParam,
    ) -> Result<(), StackError> {
        self.graph_mut()?.connect(local, peer, param)?;
        Ok(())
    }

    pub fn add_route(
        &mut self,
        prefix: IpNet,
        gateway: IpAddr,
        ifindex: u16,
    ) -> Result<NextHopId, StackError> {
        Ok(self.routes.add_route(prefix, gateway, ifindex)?)
    }

    pub fn del_route(&mut self, prefix: IpNet) -> Result<(), StackError> {
        Ok(self.routes.del_route(prefix)?)
    }

    pub fn add_local(&mut self, addr: IpAddr) -> Result<(), StackError> {
        Ok(self.routes.add_local(addr)?)
    }

    /// Mark gateway `addr` on `ifindex` reachable at `mac`. The rewrite
    /// header's source is the interface's own MAC.
    pub fn set_neighbour(
        &mut self,
        addr: IpAddr,
        ifindex: u16,
        mac: [u8; 6],
    ) -> Result<NextHopId, StackError> {
        let src = self
            .interface(ifindex)
            .and_then(|id| self.graph.get::<InterfaceModule>(id))
            .map(|iface| iface.mac())
            .ok_or(StackError::UnknownInterface(ifindex))?;
        Ok(self
            .routes
            .set_neighbour(addr, ifindex, EthernetAddress(mac), src)?)
    }

    pub fn set_unresolved(&mut self, addr: IpAddr, ifindex: u16) -> Result<NextHopId, StackError> {
        Ok(self.routes.set_unresolved(addr, ifindex)?)
    }

    pub fn routes_mut(&mut self) -> &mut RouteManager {
        &mut self.routes
    }

    /// NIC ingress: hand `m` to the interface with `ifindex`.
    pub fn input(&self, lc: &Lcore<'_>, ifindex: u16, m: PacketBuf) {
        match self.interface(ifindex) {
            Some(port) => lc.graph().input(lc, m, port),
            None => {
                debug!(target: "fastpath::datapath", ifindex, len = m.len(), "no such interface");
            }
        }
    }

    /// Start a forwarding thread for `lcore`.
    pub fn launch<F>(&self, lcore: LcoreConfig, f: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce(&Lcore<'_>) + Send + 'static,
    {
        lcore::launch(Arc::clone(&self.graph), lcore, f)
    }

    /// Start one forwarding thread per configured core, each running `f`.
    pub fn launch_all<F>(&self, f: F) -> io::Result<Vec<JoinHandle<()>>>
    where
        F: Fn(&Lcore<'_>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.topology
            .lcores()
            .iter()
            .map(|lc| {
                let f = Arc::clone(&f);
                self.launch(*lc, move |ctx| (*f)(ctx))
            })
            .collect()
    }

    pub fn log_summary(&self) {
        info!(
            modules = self.graph.len(),
            interfaces = self.interfaces.len(),
            vlans = self.vlans.len(),
            bridges = self.bridges.len(),
            sockets = ?self.routes.tables().sockets(),
            routes = self.routes.routes().count(),
            next_hops = self.routes.nexthops().len(),
            "Forwarding stack ready"
        );
    }

    /// Tear down, logging the final per-module counters.
    pub fn shutdown(self) {
        for id in self.graph.ids() {
            let (Some(module), Some(stats)) = (self.graph.module(id), self.graph.stats(id)) else {
                continue;
            };
            info!(
                node = module.name(),
                kind = %module.kind(),
                rx = stats.received(),
                tx = stats.transmitted(),
                dropped = stats.dropped(),
                "Final counters"
            );
        }
        info!("Forwarding stack stopped");
    }
}

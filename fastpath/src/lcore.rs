//! Forwarding cores and their NUMA sockets
//!
//! Core enumeration happens outside this crate; the resulting lcore → socket
//! map is handed in as a [`Topology`]. Every forwarding thread runs with an
//! [`Lcore`] context that carries its socket id and a reference to the
//! shared module graph.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::sched::{CpuSet, sched_setaffinity};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::{DropReason, Graph};
use crate::mbuf::PacketBuf;
use crate::module::{Direction, ModuleId};

/// Maximum number of NUMA sockets the per-socket tables are sized for.
pub const MAX_SOCKETS: usize = 8;

/// NUMA socket index.
pub type SocketId = usize;

/// One forwarding core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcoreConfig {
    pub id: usize,
    pub socket: SocketId,
}

/// The set of enabled forwarding cores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology {
    lcores: Vec<LcoreConfig>,
}

impl Topology {
    pub fn new(lcores: Vec<LcoreConfig>) -> Self {
        Self { lcores }
    }

    /// A single core on socket 0.
    pub fn single() -> Self {
        Self::new(vec![LcoreConfig { id: 0, socket: 0 }])
    }

    pub fn lcores(&self) -> &[LcoreConfig] {
        &self.lcores
    }

    pub fn socket_of(&self, lcore: usize) -> Option<SocketId> {
        self.lcores
            .iter()
            .find(|l| l.id == lcore)
            .map(|l| l.socket)
    }

    /// Whether any enabled core sits on `socket`.
    pub fn is_socket_used(&self, socket: SocketId) -> bool {
        self.lcores.iter().any(|l| l.socket == socket)
    }

    /// Sockets hosting at least one core, ascending, without duplicates.
    pub fn sockets(&self) -> Vec<SocketId> {
        let mut sockets: Vec<_> = self.lcores.iter().map(|l| l.socket).collect();
        sockets.sort_unstable();
        sockets.dedup();
        sockets
    }
}

/// Per-thread forwarding context.
pub struct Lcore<'g> {
    pub id: usize,
    pub socket: SocketId,
    graph: &'g Graph,
}

impl<'g> Lcore<'g> {
    pub fn new(graph: &'g Graph, id: usize, socket: SocketId) -> Self {
        Self { id, socket, graph }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Fail-closed dispatch of `m` from `from` to `to`.
    pub fn send(&self, m: PacketBuf, from: ModuleId, to: Option<ModuleId>, dir: Direction) {
        self.graph.send(self, m, from, to, dir);
    }

    /// Release `m` at module `at`, recording `reason`.
    pub fn drop_pkt(&self, m: PacketBuf, at: ModuleId, reason: DropReason) {
        self.graph.drop_pkt(m, at, reason);
    }
}

fn pin_to_core(core: usize) -> nix::Result<()> {
    let mut set = CpuSet::new();
    set.set(core)?;
    sched_setaffinity(Pid::from_raw(0), &set)
}

/// Spawn a forwarding thread for `lcore`, pinned to its core.
///
/// A failed pin is logged and the thread runs unpinned.
pub fn launch<F>(graph: Arc<Graph>, lcore: LcoreConfig, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(&Lcore<'_>) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("lcore-{}", lcore.id))
        .spawn(move || {
            if let Err(e) = pin_to_core(lcore.id) {
                warn!(lcore = lcore.id, error = %e, "Failed to pin forwarding thread");
            }
            debug!(lcore = lcore.id, socket = lcore.socket, "Forwarding thread started");
            let ctx = Lcore::new(&graph, lcore.id, lcore.socket);
            f(&ctx);
        })
}

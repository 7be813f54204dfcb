//! IP forwarding engine
//!
//! - `lpm`: bounded longest-prefix-match tables
//! - `neigh`: per-next-hop resolution state and rewrite headers
//! - `nexthop`: control-plane next-hop slot allocation
//! - `tables`: per-socket replicas and their one-time init
//! - `manager`: control plane that updates every replica
//! - `route`: the `ipfwd` pipeline node

pub mod lpm;
pub mod manager;
pub mod neigh;
pub mod nexthop;
pub mod route;
pub mod tables;

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

use crate::lcore::SocketId;

pub use lpm::{Lpm, Lpm4, Lpm6};
pub use manager::RouteManager;
pub use neigh::{NeighTable, Neighbour};
pub use nexthop::{NextHop, NextHopTable};
pub use route::{ROUTE_MAX_LINK, RouteModule};
pub use tables::{LpmTables, RouteTables, TableLimits};

/// Index into the neighbour tables; what LPM rules resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHopId(pub u32);

impl NextHopId {
    /// Reserved slot for addresses owned by the forwarder.
    pub const LOCAL: NextHopId = NextHopId(0);

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NextHopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nh{}", self.0)
    }
}

/// Control-plane table update errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("{0} table full")]
    Full(&'static str),

    #[error("no route for {0}")]
    NotFound(IpNet),

    #[error("invalid next hop {0}")]
    InvalidNextHop(NextHopId),

    #[error("no next hop for neighbour {0}")]
    UnknownNeighbour(IpAddr),

    #[error("invalid ifindex {0} (max {max})", max = ROUTE_MAX_LINK - 1)]
    InvalidIfindex(u16),

    #[error("prefix {0} does not match the gateway's address family")]
    InvalidPrefix(IpNet),

    #[error("lookup tables not initialised")]
    SocketNotInitialized,
}

/// Table allocation failures during startup. Not recoverable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitError {
    #[error("failed to allocate {table} table for socket {socket}")]
    Alloc { socket: SocketId, table: &'static str },

    #[error("socket {0} exceeds the supported socket count")]
    SocketOutOfRange(SocketId),

    #[error("invalid table limit {name}={value}")]
    InvalidLimit { name: &'static str, value: usize },
}

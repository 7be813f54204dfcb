//! fastpath: run-to-completion packet forwarding
//!
//! Packets travel through a graph of pipeline modules (interface, ethernet,
//! vlan, bridge, ipfwd), each handing the buffer to exactly one peer or
//! dropping it. The IP forwarder resolves destinations through per-socket
//! LPM and neighbour tables.

pub mod config;
pub mod graph;
pub mod lcore;
pub mod mbuf;
pub mod module;
pub mod nodes;
pub mod routing;
pub mod stack;
pub mod test_util;

pub use config::{ConfigError, FastpathConfig};
pub use graph::{DropReason, Graph};
pub use lcore::{Lcore, LcoreConfig, Topology};
pub use mbuf::PacketBuf;
pub use module::{ConnectError, ConnectParam, Direction, Module, ModuleId, ModuleType};
pub use stack::{Fastpath, StackError};

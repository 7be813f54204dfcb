//! Module node contract
//!
//! Every stage of the forwarding pipeline implements [`Module`]: a named,
//! typed unit with `receive` and `transmit` entry points and a connect
//! policy. Modules live in a [`Graph`](crate::graph::Graph) arena and refer
//! to each other through [`ModuleId`] handles, never through ownership.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::lcore::Lcore;
use crate::mbuf::PacketBuf;

/// Size of a module name including the terminator slot; names are limited
/// to `NAME_SIZE - 1` characters.
pub const NAME_SIZE: usize = 16;

/// Handle of a module in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Module type tag; drives each module's peer acceptance policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
    Ethernet,
    Vlan,
    Bridge,
    Interface,
    Route,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Ethernet => "ethernet",
            ModuleType::Vlan => "vlan",
            ModuleType::Bridge => "bridge",
            ModuleType::Interface => "interface",
            ModuleType::Route => "route",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which entry point of the peer a dispatch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the upper layers (`receive`).
    Recv,
    /// Towards the wire (`transmit`).
    Xmit,
}

/// Entry points a module has installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoints {
    pub receive: bool,
    pub transmit: bool,
}

impl EntryPoints {
    pub const BOTH: EntryPoints = EntryPoints {
        receive: true,
        transmit: true,
    };

    pub fn allows(&self, dir: Direction) -> bool {
        match dir {
            Direction::Recv => self.receive,
            Direction::Xmit => self.transmit,
        }
    }
}

/// Type-specific connect parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectParam {
    #[default]
    None,
    /// Interface slot the peer is registered under.
    Ifindex(u16),
}

/// What a module knows about a prospective peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: ModuleId,
    pub kind: ModuleType,
    pub name: String,
    pub ifindex: u16,
    pub vid: Option<u16>,
}

/// Whether a successful connect also registers the local node on the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Both ends store a reference to each other.
    Mutual,
    /// Only the local end stores the association.
    OneWay,
}

/// Configuration-time wiring errors. A failed connect mutates nothing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("{local}: invalid peer type {peer}")]
    InvalidPeer { local: String, peer: ModuleType },

    #[error("{local}: invalid ifidx {ifidx} (max {max})")]
    InvalidIndex { local: String, ifidx: u16, max: usize },

    #[error("invalid vid {0}")]
    InvalidVid(u16),

    #[error("vid {0} already configured")]
    VidInUse(u16),

    #[error("module {0} not found")]
    UnknownModule(ModuleId),

    #[error("{local}: connect to {peer} requires a parameter")]
    MissingParam { local: String, peer: ModuleType },

    #[error("module name '{0}' exceeds {max} characters", max = NAME_SIZE - 1)]
    NameTooLong(String),

    #[error("{0}: cannot connect a module to itself")]
    SelfLoop(String),
}

/// A forwarding pipeline stage.
///
/// `receive` and `transmit` take ownership of the buffer: the implementation
/// must either pass it to exactly one peer through [`Lcore::send`] or drop it
/// through [`Lcore::drop_pkt`].
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> ModuleType;

    fn ifindex(&self) -> u16 {
        0
    }

    /// 802.1Q identifier for VLAN modules.
    fn vid(&self) -> Option<u16> {
        None
    }

    fn entry_points(&self) -> EntryPoints {
        EntryPoints::BOTH
    }

    fn receive(&self, lc: &Lcore<'_>, m: PacketBuf, sender: ModuleId, me: ModuleId);

    fn transmit(&self, lc: &Lcore<'_>, m: PacketBuf, sender: ModuleId, me: ModuleId);

    /// Validate `peer` without mutating anything.
    fn check_peer(&self, peer: &PeerInfo, param: ConnectParam)
    -> Result<Propagation, ConnectError>;

    /// Store the association. Only called after `check_peer` accepted it.
    fn attach(&mut self, peer: &PeerInfo, param: ConnectParam);

    /// Every module this one holds a reference to.
    fn peers(&self) -> Vec<ModuleId>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) fn check_name(name: &str) -> Result<(), ConnectError> {
    if name.len() >= NAME_SIZE {
        return Err(ConnectError::NameTooLong(name.to_string()));
    }
    Ok(())
}

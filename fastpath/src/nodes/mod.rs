//! L2 pipeline nodes.

pub mod bridge;
pub mod ethernet;
pub mod interface;
pub mod vlan;

pub use bridge::{BridgeModule, FdbError};
pub use ethernet::{EthernetModule, VlanMode};
pub use interface::InterfaceModule;
pub use vlan::{VLAN_VID_MAX, VlanModule};

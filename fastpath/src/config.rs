//! Stack configuration
//!
//! Loaded from a JSON document. Core enumeration and NIC setup happen
//! outside this crate; the config carries their results (the lcore → socket
//! map, interface indices and MACs) together with the pipeline layout and the
//! initial routing state.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lcore::Topology;
use crate::nodes::{VLAN_VID_MAX, VlanMode};
use crate::routing::TableLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Physical port handed over by the NIC layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub ifindex: u16,
    #[serde(with = "mac")]
    pub mac: [u8; 6],
    /// Attach to the IP forwarder instead of an Ethernet port.
    #[serde(default)]
    pub routed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetConfig {
    /// Ifindex of the interface underneath.
    pub port: u16,
    #[serde(default)]
    pub mode: VlanMode,
    /// Trunk only: vid whose frames travel untagged. 0 disables it.
    #[serde(default)]
    pub native: u16,
    /// Bridge untagged traffic is handed to.
    #[serde(default)]
    pub bridge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanConfig {
    pub vid: u16,
    /// Ifindex of the trunk port.
    pub port: u16,
    #[serde(default)]
    pub bridge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: IpNet,
    pub gateway: IpAddr,
    pub ifindex: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighbourConfig {
    pub addr: IpAddr,
    #[serde(with = "mac")]
    pub mac: [u8; 6],
    pub ifindex: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FastpathConfig {
    pub lcores: Topology,
    pub limits: TableLimits,
    pub interfaces: Vec<InterfaceConfig>,
    pub ethernets: Vec<EthernetConfig>,
    pub vlans: Vec<VlanConfig>,
    pub bridges: Vec<BridgeConfig>,
    pub routes: Vec<RouteConfig>,
    pub neighbours: Vec<NeighbourConfig>,
    pub local: Vec<IpAddr>,
}

impl FastpathConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: FastpathConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-reference checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lcores.lcores().is_empty() {
            return Err(ConfigError::Invalid("no forwarding cores".into()));
        }

        let interface = |ifindex: u16| self.interfaces.iter().find(|i| i.ifindex == ifindex);
        for (i, iface) in self.interfaces.iter().enumerate() {
            if self.interfaces[..i].iter().any(|o| o.ifindex == iface.ifindex) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ifindex {}",
                    iface.ifindex
                )));
            }
        }

        for (i, eth) in self.ethernets.iter().enumerate() {
            if self.ethernets[..i].iter().any(|o| o.port == eth.port) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ethernet port {}",
                    eth.port
                )));
            }
            if eth.native > VLAN_VID_MAX {
                return Err(ConfigError::Invalid(format!(
                    "ethernet port {}: invalid native vid {}",
                    eth.port, eth.native
                )));
            }
            match interface(eth.port) {
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "ethernet port {} has no interface",
                        eth.port
                    )));
                }
                Some(iface) if iface.routed => {
                    return Err(ConfigError::Invalid(format!(
                        "interface {} is routed and cannot carry an ethernet port",
                        iface.name
                    )));
                }
                Some(_) => {}
            }
        }

        for (i, bridge) in self.bridges.iter().enumerate() {
            if self.bridges[..i].iter().any(|o| o.name == bridge.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate bridge '{}'",
                    bridge.name
                )));
            }
        }

        let bridge_known = |name: &Option<String>| match name {
            Some(name) => self.bridges.iter().any(|b| &b.name == name),
            None => true,
        };
        for eth in &self.ethernets {
            if !bridge_known(&eth.bridge) {
                return Err(ConfigError::Invalid(format!(
                    "ethernet port {}: unknown bridge",
                    eth.port
                )));
            }
        }
        for vlan in &self.vlans {
            if !self.ethernets.iter().any(|e| e.port == vlan.port) {
                return Err(ConfigError::Invalid(format!(
                    "vlan {}: no ethernet port {}",
                    vlan.vid, vlan.port
                )));
            }
            if !bridge_known(&vlan.bridge) {
                return Err(ConfigError::Invalid(format!(
                    "vlan {}: unknown bridge",
                    vlan.vid
                )));
            }
        }

        for route in &self.routes {
            if !interface(route.ifindex).is_some_and(|i| i.routed) {
                return Err(ConfigError::Invalid(format!(
                    "route {}: ifindex {} is not a routed interface",
                    route.prefix, route.ifindex
                )));
            }
        }
        for neigh in &self.neighbours {
            if !interface(neigh.ifindex).is_some_and(|i| i.routed) {
                return Err(ConfigError::Invalid(format!(
                    "neighbour {}: ifindex {} is not a routed interface",
                    neigh.addr, neigh.ifindex
                )));
            }
        }
        Ok(())
    }
}

/// Parse MAC address string to bytes.
pub fn parse_mac_address(s: &str) -> Option<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return None;
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(mac)
}

pub fn format_mac_address(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

mod mac {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(mac: &[u8; 6], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_mac_address(mac))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 6], D::Error> {
        let s = String::deserialize(d)?;
        super::parse_mac_address(&s)
            .ok_or_else(|| de::Error::custom(format!("invalid MAC address '{s}'")))
    }
}

//! Per-socket lookup tables
//!
//! Every NUMA socket hosting a forwarding core gets its own replica of the
//! IPv4 LPM, IPv6 LPM and neighbour tables. Forwarding threads only `load()`
//! the replica of their own socket. Updates build a modified copy and swap it
//! in, so a thread holding the previous snapshot finishes its packet against
//! a consistent table.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::InitError;
use super::lpm::{Lpm4, Lpm6};
use super::neigh::NeighTable;
use crate::lcore::{MAX_SOCKETS, SocketId, Topology};

/// Sizing of the per-socket tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLimits {
    pub max_lpm_rules: usize,
    pub max_lpm6_rules: usize,
    pub lpm6_number_tbl8s: usize,
    pub neigh_hash_entries: usize,
    pub neigh_bucket_entries: usize,
    pub max_next_hops: usize,
}

impl Default for TableLimits {
    fn default() -> Self {
        Self {
            max_lpm_rules: 1024,
            max_lpm6_rules: 1024,
            lpm6_number_tbl8s: 1 << 16,
            neigh_hash_entries: 1024,
            neigh_bucket_entries: 8,
            max_next_hops: 256,
        }
    }
}

impl TableLimits {
    pub fn validate(&self) -> Result<(), InitError> {
        let limits = [
            ("max_lpm_rules", self.max_lpm_rules),
            ("max_lpm6_rules", self.max_lpm6_rules),
            ("lpm6_number_tbl8s", self.lpm6_number_tbl8s),
            ("neigh_hash_entries", self.neigh_hash_entries),
            ("neigh_bucket_entries", self.neigh_bucket_entries),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(InitError::InvalidLimit { name, value });
            }
        }
        // slot 0 is local delivery, so at least one more is needed
        if self.max_next_hops < 2 || self.max_next_hops > u32::MAX as usize {
            return Err(InitError::InvalidLimit {
                name: "max_next_hops",
                value: self.max_next_hops,
            });
        }
        Ok(())
    }
}

/// IPv4 and IPv6 LPM replicas of one socket.
pub struct LpmTables {
    pub v4: ArcSwap<Lpm4>,
    pub v6: ArcSwap<Lpm6>,
}

pub struct RouteTables {
    limits: TableLimits,
    lpm: [Option<LpmTables>; MAX_SOCKETS],
    neigh: [Option<ArcSwap<NeighTable>>; MAX_SOCKETS],
}

impl RouteTables {
    pub fn new(limits: TableLimits) -> Self {
        Self {
            limits,
            lpm: std::array::from_fn(|_| None),
            neigh: std::array::from_fn(|_| None),
        }
    }

    pub fn limits(&self) -> &TableLimits {
        &self.limits
    }

    /// Create neighbour tables for every socket hosting a core.
    ///
    /// Sockets that already have one are skipped. A socket added after the
    /// first init starts from a copy of an existing replica. Returns the
    /// number of tables created.
    pub fn neigh_init(&mut self, topology: &Topology) -> Result<usize, InitError> {
        let mut created = 0;
        for socket in topology.sockets() {
            let slot = self
                .neigh
                .get(socket)
                .ok_or(InitError::SocketOutOfRange(socket))?;
            if slot.is_some() {
                debug!(socket, "Neighbour table already initialised");
                continue;
            }

            let table = match self.neigh.iter().flatten().next() {
                Some(existing) => NeighTable::clone(&existing.load()),
                None => NeighTable::try_new(self.limits.max_next_hops, self.limits.neigh_hash_entries)
                    .map_err(|_| InitError::Alloc {
                        socket,
                        table: "neighbour",
                    })?,
            };

            self.neigh[socket] = Some(ArcSwap::from_pointee(table));
            info!(
                socket,
                entries = self.limits.neigh_hash_entries,
                bucket = self.limits.neigh_bucket_entries,
                "Neighbour hash table initialised"
            );
            created += 1;
        }
        Ok(created)
    }

    /// Create the IPv4 and IPv6 LPM tables for every socket hosting a core.
    ///
    /// Same skipping and seeding rules as [`RouteTables::neigh_init`].
    pub fn lpm_init(&mut self, topology: &Topology) -> Result<usize, InitError> {
        let mut created = 0;
        for lcore in topology.lcores() {
            let socket = lcore.socket;
            let slot = self
                .lpm
                .get(socket)
                .ok_or(InitError::SocketOutOfRange(socket))?;
            if slot.is_some() {
                continue;
            }

            let tables = match self.lpm.iter().flatten().next() {
                Some(existing) => LpmTables {
                    v4: ArcSwap::from_pointee(Lpm4::clone(&existing.v4.load())),
                    v6: ArcSwap::from_pointee(Lpm6::clone(&existing.v6.load())),
                },
                None => LpmTables {
                    v4: ArcSwap::from_pointee(Lpm4::new(self.limits.max_lpm_rules)),
                    v6: ArcSwap::from_pointee(Lpm6::new(self.limits.max_lpm6_rules)),
                },
            };

            self.lpm[socket] = Some(tables);
            info!(
                lcore = lcore.id,
                socket,
                rules = self.limits.max_lpm_rules,
                rules6 = self.limits.max_lpm6_rules,
                tbl8s = self.limits.lpm6_number_tbl8s,
                "LPM tables initialised"
            );
            created += 1;
        }
        Ok(created)
    }

    /// Run both table inits.
    pub fn init(&mut self, topology: &Topology) -> Result<(), InitError> {
        self.limits.validate()?;
        self.neigh_init(topology)?;
        self.lpm_init(topology)?;
        Ok(())
    }

    pub fn lpm(&self, socket: SocketId) -> Option<&LpmTables> {
        self.lpm.get(socket)?.as_ref()
    }

    pub fn neigh(&self, socket: SocketId) -> Option<&ArcSwap<NeighTable>> {
        self.neigh.get(socket)?.as_ref()
    }

    /// Sockets with initialised LPM tables.
    pub fn sockets(&self) -> Vec<SocketId> {
        (0..MAX_SOCKETS)
            .filter(|s| self.lpm[*s].is_some())
            .collect()
    }

    pub(crate) fn lpm4_replicas(&self) -> Vec<&ArcSwap<Lpm4>> {
        self.lpm.iter().flatten().map(|t| &t.v4).collect()
    }

    pub(crate) fn lpm6_replicas(&self) -> Vec<&ArcSwap<Lpm6>> {
        self.lpm.iter().flatten().map(|t| &t.v6).collect()
    }

    pub(crate) fn neigh_replicas(&self) -> Vec<&ArcSwap<NeighTable>> {
        self.neigh.iter().flatten().collect()
    }
}

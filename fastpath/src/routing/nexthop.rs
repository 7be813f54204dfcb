//! Next-hop slot allocation
//!
//! Control-plane bookkeeping only. Routes sharing a gateway on the same
//! interface share a slot; the slot id is what the LPM tables store and what
//! the neighbour tables are indexed by. Every route pointing at a slot holds
//! a reference on it, whether the slot was allocated for a gateway or
//! claimed by id, so a slot is only reused once no route points at it.

use std::net::IpAddr;

use super::{NextHopId, TableError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    /// `None` for slots claimed by id through [`NextHopTable::hold`].
    pub gateway: Option<IpAddr>,
    pub ifindex: u16,
    users: u32,
}

impl NextHop {
    /// Number of routes using this slot.
    pub fn users(&self) -> u32 {
        self.users
    }
}

#[derive(Debug, Clone)]
pub struct NextHopTable {
    slots: Vec<Option<NextHop>>,
}

impl NextHopTable {
    /// A table of `max` slots. Slot 0 is reserved for local delivery and never
    /// handed out.
    pub fn new(max: usize) -> Self {
        Self {
            slots: vec![None; max],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: NextHopId) -> Option<&NextHop> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn find(&self, gateway: IpAddr, ifindex: u16) -> Option<NextHopId> {
        self.iter()
            .find(|(_, nh)| nh.gateway == Some(gateway) && nh.ifindex == ifindex)
            .map(|(id, _)| id)
    }

    /// Take a reference on the slot for (`gateway`, `ifindex`), allocating one
    /// if needed. The flag is true when the slot is new.
    pub fn acquire(&mut self, gateway: IpAddr, ifindex: u16) -> Result<(NextHopId, bool), TableError> {
        if let Some(id) = self.find(gateway, ifindex) {
            if let Some(nh) = self.slots[id.index()].as_mut() {
                nh.users += 1;
            }
            return Ok((id, false));
        }

        let free = self
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .ok_or(TableError::Full("next hop"))?;

        self.slots[free] = Some(NextHop {
            gateway: Some(gateway),
            ifindex,
            users: 1,
        });
        Ok((NextHopId(free as u32), true))
    }

    /// Take a reference on slot `id` directly. A free slot is claimed
    /// without a gateway; the flag is true when that happened.
    pub fn hold(&mut self, id: NextHopId) -> Result<bool, TableError> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|_| id != NextHopId::LOCAL)
            .ok_or(TableError::InvalidNextHop(id))?;
        match slot {
            Some(nh) => {
                nh.users += 1;
                Ok(false)
            }
            None => {
                *slot = Some(NextHop {
                    gateway: None,
                    ifindex: 0,
                    users: 1,
                });
                Ok(true)
            }
        }
    }

    /// Drop a reference. Returns the slot contents when the last user left.
    pub fn release(&mut self, id: NextHopId) -> Result<Option<NextHop>, TableError> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|_| id != NextHopId::LOCAL)
            .ok_or(TableError::InvalidNextHop(id))?;
        let Some(nh) = slot.as_mut() else {
            return Err(TableError::InvalidNextHop(id));
        };

        nh.users -= 1;
        if nh.users == 0 {
            return Ok(slot.take());
        }
        Ok(None)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NextHopId, &NextHop)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|nh| (NextHopId(i as u32), nh)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gw(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_slot_zero_reserved() {
        let mut table = NextHopTable::new(4);
        let (id, new) = table.acquire(gw("10.0.0.1"), 1).unwrap();
        assert_eq!(id, NextHopId(1));
        assert!(new);
        assert_eq!(
            table.release(NextHopId::LOCAL),
            Err(TableError::InvalidNextHop(NextHopId::LOCAL))
        );
    }

    #[test]
    fn test_shared_gateway_refcounted() {
        let mut table = NextHopTable::new(4);
        let (a, _) = table.acquire(gw("10.0.0.1"), 1).unwrap();
        let (b, new) = table.acquire(gw("10.0.0.1"), 1).unwrap();
        assert_eq!(a, b);
        assert!(!new);
        assert_eq!(table.get(a).unwrap().users(), 2);

        // same gateway on another interface is a different next hop
        let (c, _) = table.acquire(gw("10.0.0.1"), 2).unwrap();
        assert_ne!(a, c);

        assert_eq!(table.release(a), Ok(None));
        let freed = table.release(a).unwrap().unwrap();
        assert_eq!(freed.gateway, Some(gw("10.0.0.1")));
        assert!(table.get(a).is_none());
        assert_eq!(table.release(a), Err(TableError::InvalidNextHop(a)));
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let mut table = NextHopTable::new(3);
        table.acquire(gw("10.0.0.1"), 1).unwrap();
        let (second, _) = table.acquire(gw("10.0.0.2"), 1).unwrap();
        assert_eq!(
            table.acquire(gw("10.0.0.3"), 1),
            Err(TableError::Full("next hop"))
        );

        table.release(second).unwrap();
        let (reused, _) = table.acquire(gw("10.0.0.3"), 1).unwrap();
        assert_eq!(reused, second);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_held_slot_is_not_allocated() {
        let mut table = NextHopTable::new(4);
        assert_eq!(table.hold(NextHopId(1)), Ok(true));
        assert_eq!(table.hold(NextHopId(1)), Ok(false));
        assert_eq!(table.get(NextHopId(1)).unwrap().gateway, None);

        let (id, _) = table.acquire(gw("10.0.0.1"), 1).unwrap();
        assert_eq!(id, NextHopId(2));
        // a claimed slot never matches a gateway lookup
        assert_eq!(table.find(gw("10.0.0.1"), 1), Some(id));

        // a gateway slot can be held by id as well
        assert_eq!(table.hold(id), Ok(false));
        assert_eq!(table.get(id).unwrap().users(), 2);

        assert_eq!(
            table.hold(NextHopId::LOCAL),
            Err(TableError::InvalidNextHop(NextHopId::LOCAL))
        );
        assert_eq!(
            table.hold(NextHopId(4)),
            Err(TableError::InvalidNextHop(NextHopId(4)))
        );

        table.release(NextHopId(1)).unwrap();
        assert!(table.release(NextHopId(1)).unwrap().is_some());
        assert!(table.get(NextHopId(1)).is_none());
    }
}

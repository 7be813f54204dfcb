//! Bounded longest-prefix-match tables.

use std::fmt::Debug;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use prefix_trie::{Prefix, PrefixMap};

use super::{NextHopId, TableError};

/// A prefix type that can describe a single host address.
pub trait HostPrefix: Prefix + Copy + Eq + Debug {
    type Addr: Copy + Debug;

    /// The full-length prefix covering only `addr`.
    fn host(addr: Self::Addr) -> Self;

    /// Zero the host bits.
    fn truncate(self) -> Self;
}

impl HostPrefix for Ipv4Net {
    type Addr = Ipv4Addr;

    fn host(addr: Ipv4Addr) -> Self {
        Ipv4Net::from(addr)
    }

    fn truncate(self) -> Self {
        self.trunc()
    }
}

impl HostPrefix for Ipv6Net {
    type Addr = Ipv6Addr;

    fn host(addr: Ipv6Addr) -> Self {
        Ipv6Net::from(addr)
    }

    fn truncate(self) -> Self {
        self.trunc()
    }
}

/// Prefix → next hop map holding at most `max_rules` entries.
#[derive(Clone)]
pub struct Lpm<P: HostPrefix> {
    rules: PrefixMap<P, NextHopId>,
    len: usize,
    max_rules: usize,
}

pub type Lpm4 = Lpm<Ipv4Net>;
pub type Lpm6 = Lpm<Ipv6Net>;

impl<P: HostPrefix> Lpm<P> {
    pub fn new(max_rules: usize) -> Self {
        Self {
            rules: PrefixMap::new(),
            len: 0,
            max_rules,
        }
    }

    /// Install or replace a rule. Returns the next hop it replaced.
    ///
    /// Replacing an existing prefix succeeds even when the table is full.
    pub fn add(&mut self, prefix: P, nh: NextHopId) -> Result<Option<NextHopId>, TableError> {
        let prefix = prefix.truncate();
        if self.rules.get(&prefix).is_none() && self.len >= self.max_rules {
            return Err(TableError::Full("lpm"));
        }
        let old = self.rules.insert(prefix, nh);
        if old.is_none() {
            self.len += 1;
        }
        Ok(old)
    }

    /// Remove the rule for exactly `prefix`.
    pub fn delete(&mut self, prefix: &P) -> Option<NextHopId> {
        let old = self.rules.remove(&prefix.truncate());
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    /// Next hop of the most specific rule covering `addr`.
    pub fn lookup(&self, addr: P::Addr) -> Option<NextHopId> {
        self.rules
            .get_lpm(&P::host(addr))
            .map(|(_, nh)| *nh)
    }

    /// Rule for exactly `prefix`.
    pub fn get(&self, prefix: &P) -> Option<NextHopId> {
        self.rules.get(&prefix.truncate()).copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_rules(&self) -> usize {
        self.max_rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_most_specific_wins() {
        let mut lpm = Lpm4::new(16);
        lpm.add(v4("0.0.0.0/0"), NextHopId(1)).unwrap();
        lpm.add(v4("10.0.0.0/8"), NextHopId(2)).unwrap();
        lpm.add(v4("10.0.0.0/24"), NextHopId(3)).unwrap();

        assert_eq!(lpm.lookup("10.0.0.5".parse().unwrap()), Some(NextHopId(3)));
        assert_eq!(lpm.lookup("10.0.1.5".parse().unwrap()), Some(NextHopId(2)));
        assert_eq!(lpm.lookup("192.0.2.1".parse().unwrap()), Some(NextHopId(1)));
    }

    #[test]
    fn test_miss_without_default() {
        let mut lpm = Lpm4::new(16);
        lpm.add(v4("10.0.0.0/24"), NextHopId(3)).unwrap();
        assert_eq!(lpm.lookup("10.0.1.5".parse().unwrap()), None);
    }

    #[test]
    fn test_host_bits_ignored() {
        let mut lpm = Lpm4::new(16);
        lpm.add(v4("10.0.0.77/24"), NextHopId(3)).unwrap();
        assert_eq!(lpm.get(&v4("10.0.0.0/24")), Some(NextHopId(3)));
        assert_eq!(lpm.delete(&v4("10.0.0.1/24")), Some(NextHopId(3)));
        assert!(lpm.is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        let mut lpm = Lpm4::new(2);
        lpm.add(v4("10.0.0.0/24"), NextHopId(1)).unwrap();
        lpm.add(v4("10.0.1.0/24"), NextHopId(2)).unwrap();
        assert_eq!(
            lpm.add(v4("10.0.2.0/24"), NextHopId(3)),
            Err(TableError::Full("lpm"))
        );
        // replacing is still allowed
        assert_eq!(
            lpm.add(v4("10.0.1.0/24"), NextHopId(4)),
            Ok(Some(NextHopId(2)))
        );
        assert_eq!(lpm.len(), 2);
    }

    #[test]
    fn test_ipv6_lookup() {
        let mut lpm = Lpm6::new(4);
        lpm.add("2001:db8::/32".parse().unwrap(), NextHopId(1)).unwrap();
        lpm.add("2001:db8:1::/48".parse().unwrap(), NextHopId(2))
            .unwrap();
        assert_eq!(
            lpm.lookup("2001:db8:1::9".parse().unwrap()),
            Some(NextHopId(2))
        );
        assert_eq!(
            lpm.lookup("2001:db8:2::9".parse().unwrap()),
            Some(NextHopId(1))
        );
        assert_eq!(lpm.lookup("2001:db9::1".parse().unwrap()), None);
    }
}

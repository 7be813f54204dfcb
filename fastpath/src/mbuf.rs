//! Packet buffer with headroom
//!
//! A `PacketBuf` owns a contiguous byte region with a movable head. Nodes peel
//! headers off the front with [`PacketBuf::adj`] and push headers back with
//! [`PacketBuf::prepend`]; the bytes of a consumed header stay addressable in
//! the headroom until something overwrites them.
//!
//! Buffers are moved into every `receive`/`transmit` call, so a node either
//! hands the buffer on or drops it. There is no way to do both.

use smoltcp::wire::{EthernetFrame, EthernetProtocol};

/// Default headroom reserved in front of received frames.
pub const HEADROOM: usize = 128;

/// Ethernet header length.
pub const ETHER_HDR_LEN: usize = 14;

/// Length of the two MAC addresses at the start of an Ethernet header.
pub const ETHER_ADDRS_LEN: usize = 12;

/// 802.1Q tag length (TCI + encapsulated ethertype).
pub const VLAN_HDR_LEN: usize = 4;

/// 802.1Q tag protocol identifier.
pub const ETHER_TYPE_VLAN: u16 = 0x8100;

/// The buffer carries an IPv4 header.
pub const PKT_RX_IPV4_HDR: u64 = 1 << 5;
/// The buffer carries an IPv6 header.
pub const PKT_RX_IPV6_HDR: u64 = 1 << 7;
/// The buffer carries an IPv6 header with extension headers.
pub const PKT_RX_IPV6_HDR_EXT: u64 = 1 << 8;

/// A network packet owned by whichever node currently holds it.
#[derive(Clone, PartialEq, Eq)]
pub struct PacketBuf {
    buf: Vec<u8>,
    head: usize,
    /// Out-of-band protocol classification (`PKT_RX_*`).
    pub ol_flags: u64,
}

impl PacketBuf {
    /// Copy `frame` into a new buffer with the default headroom.
    pub fn from_frame(frame: &[u8]) -> Self {
        Self::with_headroom(frame, HEADROOM)
    }

    pub fn with_headroom(frame: &[u8], headroom: usize) -> Self {
        let mut buf = vec![0u8; headroom + frame.len()];
        buf[headroom..].copy_from_slice(frame);
        Self {
            buf,
            head: headroom,
            ol_flags: 0,
        }
    }

    pub fn with_flags(mut self, flags: u64) -> Self {
        self.ol_flags |= flags;
        self
    }

    /// Bytes from the head to the end of the packet.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.head..]
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Move the head back by `n` bytes and return the new front region.
    ///
    /// Returns `None` without touching the buffer when the headroom is too small.
    pub fn prepend(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.head {
            return None;
        }
        self.head -= n;
        Some(&mut self.buf[self.head..self.head + n])
    }

    /// Remove `n` bytes from the front and return the new data region.
    ///
    /// Returns `None` without touching the buffer when fewer than `n` bytes remain.
    pub fn adj(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.len() {
            return None;
        }
        self.head += n;
        Some(&mut self.buf[self.head..])
    }

    /// The `n` bytes immediately preceding the head.
    pub fn before(&self, n: usize) -> Option<&[u8]> {
        let start = self.head.checked_sub(n)?;
        Some(&self.buf[start..self.head])
    }

    pub fn before_mut(&mut self, n: usize) -> Option<&mut [u8]> {
        let start = self.head.checked_sub(n)?;
        Some(&mut self.buf[start..self.head])
    }

    pub fn is_ipv4(&self) -> bool {
        self.ol_flags & PKT_RX_IPV4_HDR != 0
    }

    pub fn is_ipv6(&self) -> bool {
        self.ol_flags & (PKT_RX_IPV6_HDR | PKT_RX_IPV6_HDR_EXT) != 0
    }

    /// Derive the IP classification flags from the Ethernet header at the head.
    ///
    /// Buffers that already carry flags are left alone. VLAN-tagged frames are
    /// classified by their encapsulated ethertype.
    pub fn classify(&mut self) {
        if self.ol_flags & (PKT_RX_IPV4_HDR | PKT_RX_IPV6_HDR | PKT_RX_IPV6_HDR_EXT) != 0 {
            return;
        }
        let Ok(frame) = EthernetFrame::new_checked(self.data()) else {
            return;
        };
        let mut ethertype = u16::from(frame.ethertype());
        if ethertype == ETHER_TYPE_VLAN {
            let payload = frame.payload();
            if payload.len() < VLAN_HDR_LEN {
                return;
            }
            ethertype = u16::from_be_bytes([payload[2], payload[3]]);
        }
        match EthernetProtocol::from(ethertype) {
            EthernetProtocol::Ipv4 => self.ol_flags |= PKT_RX_IPV4_HDR,
            EthernetProtocol::Ipv6 => self.ol_flags |= PKT_RX_IPV6_HDR,
            _ => {}
        }
    }
}

impl std::fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuf")
            .field("len", &self.len())
            .field("headroom", &self.head)
            .field("ol_flags", &format_args!("{:#x}", self.ol_flags))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_and_adj() {
        let mut m = PacketBuf::with_headroom(&[1, 2, 3, 4], 2);
        assert_eq!(m.len(), 4);

        m.prepend(2).unwrap().copy_from_slice(&[9, 9]);
        assert_eq!(m.data(), &[9, 9, 1, 2, 3, 4]);
        assert_eq!(m.headroom(), 0);

        m.adj(3).unwrap();
        assert_eq!(m.data(), &[2, 3, 4]);
        assert_eq!(m.before(3).unwrap(), &[9, 9, 1]);
    }

    #[test]
    fn test_prepend_without_headroom_fails_cleanly() {
        let mut m = PacketBuf::with_headroom(&[1, 2], 1);
        assert!(m.prepend(2).is_none());
        assert_eq!(m.data(), &[1, 2]);
        assert_eq!(m.headroom(), 1);
    }

    #[test]
    fn test_adj_past_end_fails_cleanly() {
        let mut m = PacketBuf::from_frame(&[1, 2]);
        assert!(m.adj(3).is_none());
        assert_eq!(m.data(), &[1, 2]);
    }

    #[test]
    fn test_classify_from_ethertype() {
        let mut frame = vec![0u8; 34];
        frame[12..14].copy_from_slice(&[0x08, 0x00]);
        let mut m = PacketBuf::from_frame(&frame);
        m.classify();
        assert!(m.is_ipv4());
        assert!(!m.is_ipv6());

        let mut frame = vec![0u8; 60];
        frame[12..14].copy_from_slice(&[0x81, 0x00]);
        frame[16..18].copy_from_slice(&[0x86, 0xdd]);
        let mut m = PacketBuf::from_frame(&frame);
        m.classify();
        assert!(m.is_ipv6());
    }

    #[test]
    fn test_classify_keeps_existing_flags() {
        let mut frame = vec![0u8; 34];
        frame[12..14].copy_from_slice(&[0x08, 0x00]);
        let mut m = PacketBuf::from_frame(&frame).with_flags(PKT_RX_IPV6_HDR);
        m.classify();
        assert!(!m.is_ipv4());
        assert!(m.is_ipv6());
    }
}

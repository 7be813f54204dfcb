//! Frame builders for tests
//!
//! Uses smoltcp for the Ethernet and IP headers; the 802.1Q tag is written
//! by hand since smoltcp has no representation for it.

use std::net::{Ipv4Addr, Ipv6Addr};

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpProtocol, Ipv4Packet,
    Ipv4Repr, Ipv6Packet, Ipv6Repr,
};

use crate::mbuf::{ETHER_HDR_LEN, ETHER_TYPE_VLAN, VLAN_HDR_LEN};

/// IPv4 header size (without options)
pub const IPV4_HDR_SIZE: usize = 20;

/// IPv6 fixed header size
pub const IPV6_HDR_SIZE: usize = 40;

pub const MAC_A: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0a];
pub const MAC_B: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0b];
pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// Untagged Ethernet frame.
pub fn ethernet_frame(dst: [u8; 6], src: [u8; 6], ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; ETHER_HDR_LEN + payload.len()];
    let repr = EthernetRepr {
        src_addr: EthernetAddress(src),
        dst_addr: EthernetAddress(dst),
        ethertype: EthernetProtocol::from(ethertype),
    };
    let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
    repr.emit(&mut eth);
    eth.payload_mut().copy_from_slice(payload);
    frame
}

/// 802.1Q tagged frame carrying `ethertype` inside the tag.
pub fn vlan_frame(dst: [u8; 6], src: [u8; 6], vid: u16, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(VLAN_HDR_LEN + payload.len());
    inner.extend_from_slice(&vid.to_be_bytes());
    inner.extend_from_slice(&ethertype.to_be_bytes());
    inner.extend_from_slice(payload);
    ethernet_frame(dst, src, ETHER_TYPE_VLAN, &inner)
}

/// IPv4 packet (no Ethernet header) with `payload_len` zero bytes of UDP payload.
pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; IPV4_HDR_SIZE + payload_len];
    let repr = Ipv4Repr {
        src_addr: src,
        dst_addr: dst,
        next_header: IpProtocol::Udp,
        payload_len,
        hop_limit: 64,
    };
    let mut ip = Ipv4Packet::new_unchecked(&mut packet[..]);
    repr.emit(&mut ip, &ChecksumCapabilities::default());
    packet
}

/// IPv6 packet (no Ethernet header) with `payload_len` zero bytes of UDP payload.
pub fn ipv6_packet(src: Ipv6Addr, dst: Ipv6Addr, payload_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; IPV6_HDR_SIZE + payload_len];
    let repr = Ipv6Repr {
        src_addr: src,
        dst_addr: dst,
        next_header: IpProtocol::Udp,
        payload_len,
        hop_limit: 64,
    };
    let mut ip = Ipv6Packet::new_unchecked(&mut packet[..]);
    repr.emit(&mut ip);
    packet
}

/// Ethernet frame carrying an IPv4 packet from `src` to `dst`.
pub fn ipv4_frame(dst_mac: [u8; 6], src_mac: [u8; 6], src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    ethernet_frame(dst_mac, src_mac, 0x0800, &ipv4_packet(src, dst, 8))
}

/// Ethernet frame carrying an IPv6 packet from `src` to `dst`.
pub fn ipv6_frame(dst_mac: [u8; 6], src_mac: [u8; 6], src: Ipv6Addr, dst: Ipv6Addr) -> Vec<u8> {
    ethernet_frame(dst_mac, src_mac, 0x86dd, &ipv6_packet(src, dst, 8))
}

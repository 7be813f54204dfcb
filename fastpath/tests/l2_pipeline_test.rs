//! VLAN and bridge pipeline
//!
//! Port 0 is a trunk carrying vid 100, ports 1 and 2 are access ports. The
//! VLAN and both access ports are members of bridge `br0`.

use std::sync::Arc;

use fastpath::mbuf::PacketBuf;
use fastpath::nodes::{BridgeModule, InterfaceModule, VlanMode};
use fastpath::routing::TableLimits;
use fastpath::test_util::packets::{BROADCAST_MAC, MAC_A, MAC_B, ethernet_frame, vlan_frame};
use fastpath::test_util::{Capture, capture_interface};
use fastpath::{Fastpath, Lcore, ModuleId, StackError, Topology};

const VID: u16 = 100;
const HOST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0xcc];
const PAYLOAD: &[u8] = b"the quick brown fox jumps over the lazy dog";

struct Pipeline {
    fp: Fastpath,
    trunk: Capture,
    access1: Capture,
    access2: Capture,
}

fn pipeline() -> Pipeline {
    let mut fp = Fastpath::new(Topology::single(), TableLimits::default()).unwrap();
    let (port0, trunk) = capture_interface("port0", 0, MAC_A);
    let (port1, access1) = capture_interface("port1", 1, MAC_B);
    let (port2, access2) = capture_interface("port2", 2, HOST_MAC);
    fp.add_interface(port0).unwrap();
    fp.add_interface(port1).unwrap();
    fp.add_interface(port2).unwrap();

    fp.add_bridge("br0").unwrap();
    fp.add_ethernet(0, VlanMode::Trunk, 0).unwrap();
    for port in [1, 2] {
        let eth = fp.add_ethernet(port, VlanMode::Access, 0).unwrap();
        fp.bridge_port("br0", eth).unwrap();
    }
    let vlan = fp.add_vlan(VID, 0).unwrap();
    fp.bridge_port("br0", vlan).unwrap();

    Pipeline {
        fp,
        trunk,
        access1,
        access2,
    }
}

impl Pipeline {
    fn input(&self, ifindex: u16, frame: &[u8]) {
        let graph = Arc::clone(self.fp.graph());
        let lc = Lcore::new(&graph, 0, 0);
        self.fp.input(&lc, ifindex, PacketBuf::from_frame(frame));
    }

    fn dropped(&self, id: ModuleId) -> u64 {
        self.fp.graph().stats(id).unwrap().dropped()
    }
}

#[test]
fn test_wiring_is_symmetric() {
    let _ = tracing_subscriber::fmt::try_init();

    let p = pipeline();
    let graph = p.fp.graph();
    let port0 = p.fp.interface(0).unwrap();
    let eth0 = p.fp.ethernet(0).unwrap();
    let eth1 = p.fp.ethernet(1).unwrap();
    let vlan = p.fp.vlan(VID).unwrap();
    let br0 = p.fp.bridge("br0").unwrap();

    for (a, b) in [(eth0, port0), (vlan, eth0), (br0, vlan), (br0, eth1)] {
        assert!(graph.is_linked(a, b));
        assert!(graph.is_linked(b, a));
    }
    assert_eq!(graph.get::<BridgeModule>(br0).unwrap().ports().len(), 3);
    assert_eq!(graph.get::<InterfaceModule>(port0).unwrap().upper(), Some(eth0));
}

#[test]
fn test_tagged_trunk_frame_is_untagged_on_access_ports() {
    let _ = tracing_subscriber::fmt::try_init();

    let p = pipeline();
    let frame = vlan_frame(BROADCAST_MAC, HOST_MAC, VID, 0x0800, PAYLOAD);
    p.input(0, &frame);

    let untagged = ethernet_frame(BROADCAST_MAC, HOST_MAC, 0x0800, PAYLOAD);
    assert_eq!(p.access1.frames(), vec![untagged.clone()]);
    assert_eq!(p.access2.frames(), vec![untagged]);
    // never reflected back to the trunk it came from
    assert!(p.trunk.frames().is_empty());
}

#[test]
fn test_access_frame_is_tagged_on_trunk() {
    let _ = tracing_subscriber::fmt::try_init();

    let p = pipeline();
    let frame = ethernet_frame(BROADCAST_MAC, HOST_MAC, 0x86dd, PAYLOAD);
    p.input(1, &frame);

    assert_eq!(
        p.trunk.frames(),
        vec![vlan_frame(BROADCAST_MAC, HOST_MAC, VID, 0x86dd, PAYLOAD)]
    );
    assert_eq!(p.access2.frames(), vec![frame]);
    assert!(p.access1.frames().is_empty());
}

#[test]
fn test_known_destination_is_not_flooded() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut p = pipeline();
    let eth2 = p.fp.ethernet(2).unwrap();
    p.fp.add_fdb("br0", MAC_B, eth2).unwrap();

    let frame = vlan_frame(MAC_B, HOST_MAC, VID, 0x0800, PAYLOAD);
    p.input(0, &frame);

    assert!(p.access1.frames().is_empty());
    assert_eq!(
        p.access2.frames(),
        vec![ethernet_frame(MAC_B, HOST_MAC, 0x0800, PAYLOAD)]
    );
}

#[test]
fn test_tag_policy_drops() {
    let _ = tracing_subscriber::fmt::try_init();

    let p = pipeline();
    let eth0 = p.fp.ethernet(0).unwrap();
    let eth1 = p.fp.ethernet(1).unwrap();

    // tagged frame on an access port
    p.input(1, &vlan_frame(BROADCAST_MAC, HOST_MAC, VID, 0x0800, PAYLOAD));
    assert_eq!(p.dropped(eth1), 1);

    // vid without a VLAN context
    p.input(0, &vlan_frame(BROADCAST_MAC, HOST_MAC, 200, 0x0800, PAYLOAD));
    assert_eq!(p.dropped(eth0), 1);

    // runt frame
    p.input(0, &[0u8; 6]);
    assert_eq!(p.dropped(eth0), 2);

    assert!(p.trunk.frames().is_empty());
    assert!(p.access1.frames().is_empty());
    assert!(p.access2.frames().is_empty());
}

#[test]
fn test_unwired_vlan_fails_closed() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut p = pipeline();
    // vid 300 exists but belongs to no bridge
    let vlan = p.fp.add_vlan(300, 0).unwrap();
    p.input(0, &vlan_frame(BROADCAST_MAC, HOST_MAC, 300, 0x0800, PAYLOAD));

    assert_eq!(p.dropped(vlan), 1);
    assert!(p.access1.frames().is_empty());
}

#[test]
fn test_rx_only_interface_drops_egress() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut fp = Fastpath::new(Topology::single(), TableLimits::default()).unwrap();
    let (port0, _cap0) = capture_interface("port0", 0, MAC_A);
    fp.add_interface(port0).unwrap();
    fp.add_interface(InterfaceModule::rx_only("mirror", 1, MAC_B))
        .unwrap();
    fp.add_bridge("br0").unwrap();
    let eth0 = fp.add_ethernet(0, VlanMode::Access, 0).unwrap();
    let eth1 = fp.add_ethernet(1, VlanMode::Access, 0).unwrap();
    fp.bridge_port("br0", eth0).unwrap();
    fp.bridge_port("br0", eth1).unwrap();

    let graph = Arc::clone(fp.graph());
    let lc = Lcore::new(&graph, 0, 0);
    let frame = ethernet_frame(BROADCAST_MAC, HOST_MAC, 0x0800, PAYLOAD);
    fp.input(&lc, 0, PacketBuf::from_frame(&frame));

    // eth1 found no transmit entry point below it
    assert_eq!(graph.stats(eth1).unwrap().transmitted(), 1);
    assert_eq!(graph.stats(eth1).unwrap().dropped(), 1);
    assert_eq!(graph.stats(fp.interface(1).unwrap()).unwrap().transmitted(), 0);
}

#[test]
fn test_duplicate_vid_and_unknown_port_rejected() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut p = pipeline();
    assert!(p.fp.add_vlan(VID, 0).is_err());
    assert!(p.fp.add_vlan(101, 9).is_err());
    assert!(p.fp.add_vlan(4095, 0).is_err());
    let vlan = p.fp.vlan(VID).unwrap();
    assert!(p.fp.bridge_port("br9", vlan).is_err());
}

#[test]
fn test_native_vlan_travels_untagged() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut fp = Fastpath::new(Topology::single(), TableLimits::default()).unwrap();
    let (port0, trunk) = capture_interface("port0", 0, MAC_A);
    let (port1, access) = capture_interface("port1", 1, MAC_B);
    fp.add_interface(port0).unwrap();
    fp.add_interface(port1).unwrap();
    fp.add_bridge("br0").unwrap();
    fp.add_ethernet(0, VlanMode::Trunk, VID).unwrap();
    let eth1 = fp.add_ethernet(1, VlanMode::Access, 0).unwrap();
    fp.bridge_port("br0", eth1).unwrap();
    let vlan = fp.add_vlan(VID, 0).unwrap();
    fp.bridge_port("br0", vlan).unwrap();

    let graph = Arc::clone(fp.graph());
    let lc = Lcore::new(&graph, 0, 0);
    let untagged = ethernet_frame(BROADCAST_MAC, HOST_MAC, 0x0800, PAYLOAD);

    // untagged on the trunk belongs to the native VLAN
    fp.input(&lc, 0, PacketBuf::from_frame(&untagged));
    assert_eq!(access.frames(), vec![untagged.clone()]);
    assert_eq!(graph.stats(vlan).unwrap().received(), 1);

    // and leaves the trunk without a tag
    fp.input(&lc, 1, PacketBuf::from_frame(&untagged));
    assert_eq!(trunk.frames(), vec![untagged]);

    // other vids keep their tag
    let tagged = vlan_frame(BROADCAST_MAC, HOST_MAC, 200, 0x0800, PAYLOAD);
    lc.send(
        PacketBuf::from_frame(&tagged),
        vlan,
        fp.ethernet(0),
        fastpath::Direction::Xmit,
    );
    assert_eq!(trunk.frames(), vec![tagged]);
}

#[test]
fn test_setup_never_rewires() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut p = pipeline();
    let eth0 = p.fp.ethernet(0).unwrap();
    let br0 = p.fp.bridge("br0").unwrap();
    let port0 = p.fp.interface(0).unwrap();

    assert!(matches!(
        p.fp.add_ethernet(0, VlanMode::Access, 0),
        Err(StackError::DuplicatePort(0))
    ));
    assert!(matches!(
        p.fp.add_bridge("br0"),
        Err(StackError::DuplicateBridge(_))
    ));
    assert!(matches!(
        p.fp.route_interface(0),
        Err(StackError::InterfaceInUse(0))
    ));

    let len = p.fp.graph().len();
    assert!(matches!(
        p.fp.add_ethernet(7, VlanMode::Trunk, 4095),
        Err(StackError::UnknownInterface(7)) | Err(StackError::Connect(_))
    ));
    assert_eq!(p.fp.graph().len(), len);
    assert_eq!(p.fp.ethernet(0), Some(eth0));
    assert_eq!(p.fp.bridge("br0"), Some(br0));
    assert_eq!(
        p.fp.graph().get::<InterfaceModule>(port0).unwrap().upper(),
        Some(eth0)
    );
}

#[test]
fn test_routed_interface_cannot_carry_ethernet() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut fp = Fastpath::new(Topology::single(), TableLimits::default()).unwrap();
    let (port0, _cap) = capture_interface("port0", 0, MAC_A);
    let port0 = fp.add_interface(port0).unwrap();
    fp.route_interface(0).unwrap();

    assert!(matches!(
        fp.add_ethernet(0, VlanMode::Access, 0),
        Err(StackError::InterfaceInUse(0))
    ));
    assert!(fp.ethernet(0).is_none());
    assert_eq!(
        fp.graph().get::<InterfaceModule>(port0).unwrap().upper(),
        Some(fp.route_module())
    );
}

//! Test utilities for driving pipelines without a NIC
//!
//! Packet builders produce raw frames; [`capture_interface`] creates an
//! interface node whose TX queue the test drains.

pub mod packets;

use crossbeam_channel::{Receiver, bounded};

use crate::mbuf::PacketBuf;
use crate::nodes::InterfaceModule;

/// Depth of a capture interface's TX queue.
pub const CAPTURE_DEPTH: usize = 64;

/// Receiving end of a capture interface.
pub struct Capture {
    rx: Receiver<PacketBuf>,
}

impl Capture {
    /// Everything transmitted so far, in order.
    pub fn drain(&self) -> Vec<PacketBuf> {
        self.rx.try_iter().collect()
    }

    /// Raw frames transmitted so far.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.drain().iter().map(|m| m.data().to_vec()).collect()
    }
}

/// An interface node whose transmitted frames end up in the returned
/// [`Capture`].
pub fn capture_interface(name: &str, ifindex: u16, mac: [u8; 6]) -> (InterfaceModule, Capture) {
    let (tx, rx) = bounded(CAPTURE_DEPTH);
    (InterfaceModule::new(name, ifindex, mac, tx), Capture { rx })
}

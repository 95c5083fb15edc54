/*! The L2 engine: ingress qualification, MAC learning, and the
forward/flood path with access/trunk tagging on egress.

The qualifier is the sole entry from the physical emulation into the
stack; everything it rejects vanishes silently.
*/

use crate::addr::MacAddress;
use crate::arp;
use crate::frame::{
    self, ArpPacket, EthernetHdr, FrameBuf, ETHERTYPE_ARP, ETHERTYPE_IPV4,
};
use crate::l3;
use crate::phys;
use crate::topology::{Interface, InterfaceState, L2Mode, Node};
use std::sync::Arc;
use tracing::*;

/// What the ingress qualifier decided about a received frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Verdict {
    /// Reject; nothing is logged beyond a trace line.
    Drop,
    /// Frame is for this node's own stack (ARP or routed traffic).
    Layer3,
    /// Frame takes the learning-bridge path, on the given VLAN.
    Switch(u16),
}

/// The accept/drop matrix.  An interface's L3 mode, Access mode and Trunk
/// mode are mutually exclusive, so each row is governed by one of them:
///
/// * L3: untagged only, and only for our MAC or broadcast.
/// * Access: untagged only, and only with a VLAN configured; the effective
///   VLAN is the port's.
/// * Trunk: tagged only, and only for VLANs in the membership set.
/// * Unconfigured interfaces accept nothing.
fn qualify(state: &InterfaceState, hdr: &EthernetHdr) -> Verdict {
    if state.is_l3_mode() {
        if hdr.vlan.is_some() {
            return Verdict::Drop;
        }
        if hdr.dst_mac == state.mac() || hdr.dst_mac.is_broadcast() {
            return Verdict::Layer3;
        }
        return Verdict::Drop;
    }
    match state.l2_mode() {
        L2Mode::Access => match (hdr.vlan, state.access_vlan()) {
            (None, Some(vid)) => Verdict::Switch(vid),
            _ => Verdict::Drop,
        },
        L2Mode::Trunk => match hdr.vlan {
            Some(tag) if state.is_vlan_member(tag.vid) => Verdict::Switch(tag.vid),
            _ => Verdict::Drop,
        },
        L2Mode::Unknown => Verdict::Drop,
    }
}

/// Entry point into the stack from the physical emulation.
pub(crate) fn frame_recv(node: &Arc<Node>, intf: &Arc<Interface>, mut frame: FrameBuf) {
    let hdr = match EthernetHdr::parse(frame.bytes()) {
        Ok(hdr) => hdr,
        Err(e) => {
            trace!("{}.{}: unparseable frame: {}", node.name(), intf.name(), e);
            return;
        }
    };
    match qualify(&intf.state(), &hdr) {
        Verdict::Drop => {
            trace!(
                "{}.{}: frame from {} rejected at ingress",
                node.name(),
                intf.name(),
                hdr.src_mac
            );
        }
        Verdict::Layer3 => dispatch_layer3(node, intf, &hdr, &mut frame),
        Verdict::Switch(vlan) => {
            // Access ingress delivers untagged frames; tag them here so the
            // whole switch path sees the effective VLAN on the frame itself.
            if hdr.vlan.is_none() {
                if let Err(e) = frame::tag_with_vlan(&mut frame, vlan) {
                    debug!("{}.{}: cannot tag: {}", node.name(), intf.name(), e);
                    return;
                }
            }
            switch_recv(node, intf, frame, vlan);
        }
    }
}

fn dispatch_layer3(node: &Arc<Node>, intf: &Arc<Interface>, hdr: &EthernetHdr, frame: &mut FrameBuf) {
    match hdr.ethertype {
        ETHERTYPE_ARP => {
            let payload = match frame::payload(frame.bytes()) {
                Ok(payload) => payload,
                Err(e) => {
                    trace!("{}.{}: {}", node.name(), intf.name(), e);
                    return;
                }
            };
            match ArpPacket::parse(payload) {
                Ok(pkt) => arp::recv(node, intf, &pkt),
                Err(e) => trace!("{}.{}: bad ARP payload: {}", node.name(), intf.name(), e),
            }
        }
        ETHERTYPE_IPV4 => {
            let packet = match frame::payload_mut(frame.bytes_mut()) {
                Ok(packet) => packet,
                Err(e) => {
                    trace!("{}.{}: {}", node.name(), intf.name(), e);
                    return;
                }
            };
            l3::ipv4_recv(node, packet);
        }
        ethertype => {
            trace!(
                "{}.{}: no handler for ethertype {:#06x}",
                node.name(),
                intf.name(),
                ethertype
            );
        }
    }
}

/// The learning-bridge path: learn the source, then forward or flood.
fn switch_recv(node: &Arc<Node>, rx_intf: &Arc<Interface>, frame: FrameBuf, vlan: u16) {
    let bytes = frame.bytes();
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[0..6]);
    let dst_mac = MacAddress::from_octets(mac);
    mac.copy_from_slice(&bytes[6..12]);
    let src_mac = MacAddress::from_octets(mac);

    node.mac_table().learn(src_mac, rx_intf.name());

    if dst_mac.is_broadcast() {
        flood(node, rx_intf, &frame, vlan);
        return;
    }
    let entry = match node.mac_table().lookup(dst_mac) {
        Some(entry) => entry,
        None => {
            flood(node, rx_intf, &frame, vlan);
            return;
        }
    };
    match node.interface_by_name(&entry.oif) {
        Some(oif) => egress(node, &oif, frame, vlan),
        None => trace!(
            "{}: learned egress {} no longer exists",
            node.name(),
            entry.oif
        ),
    }
}

/// Sends a copy of `frame` out of every L2 interface except the one it
/// arrived on.
fn flood(node: &Arc<Node>, rx_intf: &Arc<Interface>, frame: &FrameBuf, vlan: u16) {
    for intf in node.interfaces() {
        if Arc::ptr_eq(&intf, rx_intf) {
            continue;
        }
        match intf.l2_mode() {
            L2Mode::Access | L2Mode::Trunk => egress(node, &intf, frame.clone(), vlan),
            L2Mode::Unknown => {}
        }
    }
}

/// Egress VLAN policy.  The frame was copied by the caller, so the
/// transformations here cannot alias a concurrent fan-out.
fn egress(node: &Arc<Node>, oif: &Arc<Interface>, mut frame: FrameBuf, vlan: u16) {
    let state = oif.state();
    if state.is_l3_mode() {
        debug_assert!(false, "L2 frame egressing an L3-mode interface");
        return;
    }
    match state.l2_mode() {
        L2Mode::Access => {
            let configured = match state.access_vlan() {
                Some(vid) => vid,
                None => {
                    warn!(
                        "{}.{}: access interface without a VLAN cannot egress",
                        node.name(),
                        oif.name()
                    );
                    return;
                }
            };
            if configured != vlan {
                trace!(
                    "{}.{}: VLAN {} does not match access VLAN {}",
                    node.name(),
                    oif.name(),
                    vlan,
                    configured
                );
                return;
            }
            if let Err(e) = frame::untag(&mut frame) {
                debug!("{}.{}: {}", node.name(), oif.name(), e);
                return;
            }
            send(node, oif, &frame);
        }
        L2Mode::Trunk => {
            if !state.is_vlan_member(vlan) {
                trace!(
                    "{}.{}: VLAN {} not in trunk membership",
                    node.name(),
                    oif.name(),
                    vlan
                );
                return;
            }
            send(node, oif, &frame);
        }
        L2Mode::Unknown => {
            trace!("{}.{}: not an L2 interface", node.name(), oif.name());
        }
    }
}

fn send(node: &Arc<Node>, oif: &Arc<Interface>, frame: &FrameBuf) {
    if let Err(e) = phys::send_on_interface(oif, frame.bytes()) {
        debug!("{}.{}: send failed: {}", node.name(), oif.name(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Ipv4Address;
    use crate::frame::VlanTag;

    fn untagged(dst_mac: MacAddress) -> EthernetHdr {
        EthernetHdr {
            dst_mac,
            src_mac: MacAddress::from_u64(0x1111_1111_1111),
            vlan: None,
            ethertype: ETHERTYPE_IPV4,
        }
    }

    fn tagged(dst_mac: MacAddress, vid: u16) -> EthernetHdr {
        EthernetHdr {
            vlan: Some(VlanTag {
                pcp: 0,
                dei: false,
                vid,
            }),
            ..untagged(dst_mac)
        }
    }

    fn l3_state() -> InterfaceState {
        let mut state = InterfaceState::new(MacAddress::from_u64(0xAAAA));
        state.set_ip("10.0.0.1".parse::<Ipv4Address>().unwrap(), 24);
        state
    }

    fn access_state(vid: u16) -> InterfaceState {
        let mut state = InterfaceState::new(MacAddress::from_u64(0xBBBB));
        state.set_l2_mode(L2Mode::Access);
        if vid != 0 {
            state.set_vlan_membership(vid);
        }
        state
    }

    fn trunk_state(vids: &[u16]) -> InterfaceState {
        let mut state = InterfaceState::new(MacAddress::from_u64(0xCCCC));
        state.set_l2_mode(L2Mode::Trunk);
        for &vid in vids {
            state.set_vlan_membership(vid);
        }
        state
    }

    #[test]
    fn l3_interfaces_take_own_or_broadcast_untagged_frames() {
        let state = l3_state();
        let own = state.mac();
        assert_eq!(qualify(&state, &untagged(own)), Verdict::Layer3);
        assert_eq!(
            qualify(&state, &untagged(MacAddress::BROADCAST)),
            Verdict::Layer3
        );
        assert_eq!(
            qualify(&state, &untagged(MacAddress::from_u64(0xDEAD))),
            Verdict::Drop
        );
        assert_eq!(qualify(&state, &tagged(own, 10)), Verdict::Drop);
    }

    #[test]
    fn access_interfaces_take_untagged_frames_on_their_vlan() {
        let state = access_state(10);
        assert_eq!(
            qualify(&state, &untagged(MacAddress::BROADCAST)),
            Verdict::Switch(10)
        );
        assert_eq!(
            qualify(&state, &tagged(MacAddress::BROADCAST, 10)),
            Verdict::Drop
        );
        // access port without a VLAN accepts nothing
        let bare = access_state(0);
        assert_eq!(qualify(&bare, &untagged(MacAddress::BROADCAST)), Verdict::Drop);
    }

    #[test]
    fn trunk_interfaces_take_tagged_member_frames() {
        let state = trunk_state(&[10, 11]);
        assert_eq!(
            qualify(&state, &tagged(MacAddress::BROADCAST, 10)),
            Verdict::Switch(10)
        );
        assert_eq!(
            qualify(&state, &tagged(MacAddress::BROADCAST, 11)),
            Verdict::Switch(11)
        );
        assert_eq!(
            qualify(&state, &tagged(MacAddress::BROADCAST, 12)),
            Verdict::Drop
        );
        assert_eq!(
            qualify(&state, &untagged(MacAddress::BROADCAST)),
            Verdict::Drop
        );
    }

    #[test]
    fn unconfigured_interfaces_accept_nothing() {
        let state = InterfaceState::new(MacAddress::from_u64(0xEEEE));
        assert_eq!(
            qualify(&state, &untagged(MacAddress::BROADCAST)),
            Verdict::Drop
        );
        assert_eq!(
            qualify(&state, &tagged(MacAddress::BROADCAST, 1)),
            Verdict::Drop
        );
    }
}

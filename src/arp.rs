/*! The ARP engine: broadcast requests, targeted replies, cache updates.

Replies are not validated against any pending request; whatever arrives
updates the cache.  There are no retries and no pending-packet queue.
*/

use crate::addr::{Ipv4Address, MacAddress};
use crate::error::{Error, Result};
use crate::frame::{self, ArpPacket, ARP_OP_REPLY, ARP_OP_REQUEST, ETHERTYPE_ARP};
use crate::phys;
use crate::topology::{Interface, Node};
use std::sync::Arc;
use tracing::*;

/// Broadcasts a request for `target_ip` out of `oif`, or out of whichever
/// interface's subnet contains `target_ip` when the caller doesn't care.
pub(crate) fn send_broadcast_request(
    node: &Arc<Node>,
    oif: Option<Arc<Interface>>,
    target_ip: Ipv4Address,
) -> Result<()> {
    let oif = match oif {
        Some(oif) => oif,
        None => match node.matching_subnet_interface(target_ip) {
            Some(oif) => oif,
            None => {
                warn!("{}: no eligible subnet for {}", node.name(), target_ip);
                return Err(Error::NoEligibleSubnet(target_ip));
            }
        },
    };
    let (sender_ip, _mask) = oif
        .ip()
        .ok_or_else(|| Error::NotL3Mode(oif.name().to_string()))?;
    let request = ArpPacket {
        op: ARP_OP_REQUEST,
        sender_mac: oif.mac(),
        sender_ip,
        target_mac: MacAddress::ZERO,
        target_ip,
    };
    debug!(
        "{}.{}: who has {}? tell {}",
        node.name(),
        oif.name(),
        target_ip,
        sender_ip
    );
    let frame = frame::build_frame(
        MacAddress::BROADCAST,
        oif.mac(),
        ETHERTYPE_ARP,
        &request.to_vec(),
    );
    phys::send_on_interface(&oif, frame.bytes())
}

/// An ARP message arrived on an L3-mode interface.
pub(crate) fn recv(node: &Arc<Node>, iif: &Arc<Interface>, pkt: &ArpPacket) {
    match pkt.op {
        ARP_OP_REQUEST => process_request(node, iif, pkt),
        ARP_OP_REPLY => process_reply(node, iif, pkt),
        op => trace!("{}.{}: ignoring ARP op {}", node.name(), iif.name(), op),
    }
}

fn process_request(node: &Arc<Node>, iif: &Arc<Interface>, req: &ArpPacket) {
    let (own_ip, _mask) = match iif.ip() {
        Some(ip) => ip,
        None => return,
    };
    if req.target_ip != own_ip {
        trace!(
            "{}.{}: ARP request for {} is not for us",
            node.name(),
            iif.name(),
            req.target_ip
        );
        return;
    }
    // The requester told us its own mapping; keep it so the reverse
    // resolution is already done.
    node.arp_table().update(req.sender_ip, req.sender_mac, iif.name());

    let reply = ArpPacket {
        op: ARP_OP_REPLY,
        sender_mac: iif.mac(),
        sender_ip: own_ip,
        target_mac: req.sender_mac,
        target_ip: req.sender_ip,
    };
    debug!(
        "{}.{}: {} is at {}",
        node.name(),
        iif.name(),
        own_ip,
        iif.mac()
    );
    let frame = frame::build_frame(req.sender_mac, iif.mac(), ETHERTYPE_ARP, &reply.to_vec());
    if let Err(e) = phys::send_on_interface(iif, frame.bytes()) {
        debug!("{}.{}: ARP reply not sent: {}", node.name(), iif.name(), e);
    }
}

fn process_reply(node: &Arc<Node>, iif: &Arc<Interface>, rep: &ArpPacket) {
    debug!(
        "{}.{}: learned {} -> {}",
        node.name(),
        iif.name(),
        rep.sender_ip,
        rep.sender_mac
    );
    node.arp_table().update(rep.sender_ip, rep.sender_mac, iif.name());
}

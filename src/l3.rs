/*! The L3 engine: longest-prefix routing, TTL handling, local delivery,
and the hand-off back down to L2 with a next-hop hint.

Nothing here queues: a packet that needs an ARP resolution it doesn't have
triggers the resolution and is dropped.
*/

use crate::addr::Ipv4Address;
use crate::arp;
use crate::error::{Error, Result};
use crate::frame::{self, Ipv4Hdr, ETHERTYPE_IPV4, IPPROTO_ICMP};
use crate::phys;
use crate::tables::Route;
use crate::topology::{Interface, Node};
use std::sync::Arc;
use tracing::*;

/// Where an IPv4 packet goes after the route lookup.
#[derive(Clone, PartialEq, Eq, Debug)]
enum Disposition {
    /// Addressed to this node; hand the payload upward.
    LocalDeliver,
    /// On a directly attached subnet; the destination is its own next hop.
    DirectHost,
    /// Via a gateway, out of the route's egress interface.
    Forward {
        next_hop: Ipv4Address,
        oif: Option<String>,
    },
    /// No route covers the destination.
    Unroutable,
    /// The hop count ran out here.
    TtlExpired,
}

fn classify(route: Option<&Route>, dst_is_local: bool, ttl: u8) -> Disposition {
    let route = match route {
        Some(route) => route,
        None => return Disposition::Unroutable,
    };
    match route.gateway {
        None => {
            if dst_is_local {
                Disposition::LocalDeliver
            } else {
                Disposition::DirectHost
            }
        }
        Some(gateway) => {
            if ttl <= 1 {
                Disposition::TtlExpired
            } else {
                Disposition::Forward {
                    next_hop: gateway,
                    oif: route.oif.clone(),
                }
            }
        }
    }
}

/// Entry point from L2: an IPv4 packet received on (or promoted by) this
/// node.  `packet` is the raw header + payload; the TTL is rewritten in
/// place on the forwarding path.
pub(crate) fn ipv4_recv(node: &Arc<Node>, packet: &mut [u8]) {
    let hdr = match Ipv4Hdr::parse(packet) {
        Ok(hdr) => hdr,
        Err(e) => {
            trace!("{}: unparseable IPv4 packet: {}", node.name(), e);
            return;
        }
    };
    let route = node.routing_table().lookup_lpm(hdr.dst);
    let dst_is_local = node.is_local_address(hdr.dst);
    match classify(route.as_ref(), dst_is_local, hdr.ttl) {
        Disposition::Unroutable => {
            warn!("{}: cannot route {}", node.name(), hdr.dst);
        }
        Disposition::TtlExpired => {
            trace!("{}: TTL expired for {}", node.name(), hdr.dst);
        }
        Disposition::LocalDeliver => local_deliver(node, &hdr),
        Disposition::DirectHost => {
            if let Err(e) = demote_to_l2(node, hdr.dst, None, packet, ETHERTYPE_IPV4) {
                debug!("{}: {}", node.name(), e);
            }
        }
        Disposition::Forward { next_hop, oif } => {
            if frame::set_ttl(packet, hdr.ttl - 1).is_err() {
                return;
            }
            let oif = match oif {
                Some(name) => match node.interface_by_name(&name) {
                    Some(intf) => Some(intf),
                    None => {
                        warn!("{}: route egress {} does not exist", node.name(), name);
                        return;
                    }
                },
                None => None,
            };
            if let Err(e) = demote_to_l2(node, next_hop, oif, packet, ETHERTYPE_IPV4) {
                debug!("{}: {}", node.name(), e);
            }
        }
    }
}

/// Top of the stack for this simulator: ICMP is the ping path, everything
/// else has no handler.
fn local_deliver(node: &Arc<Node>, hdr: &Ipv4Hdr) {
    match hdr.protocol {
        IPPROTO_ICMP => info!("{}: ping success from {}", node.name(), hdr.src),
        protocol => trace!("{}: no handler for protocol {}", node.name(), protocol),
    }
}

/// Submits a ping towards `dst` from this node.
pub(crate) fn ping(node: &Arc<Node>, dst: Ipv4Address) -> Result<()> {
    info!("{}: ping {}", node.name(), dst);
    originate(node, &[], IPPROTO_ICMP, dst)
}

/// Synthesises an IPv4 packet from this node and hands it downward.
pub(crate) fn originate(
    node: &Arc<Node>,
    payload: &[u8],
    protocol: u8,
    dst: Ipv4Address,
) -> Result<()> {
    let src = node.loopback().unwrap_or(Ipv4Address::UNSPECIFIED);
    let hdr = Ipv4Hdr::originate(src, dst, protocol, payload.len());
    let route = match node.routing_table().lookup_lpm(dst) {
        Some(route) => route,
        None => {
            warn!("{}: cannot route {}", node.name(), dst);
            return Err(Error::CannotRoute(dst));
        }
    };
    let (next_hop, oif_name) = match route.gateway {
        None => (dst, None),
        Some(gateway) => (gateway, route.oif),
    };
    let oif = match oif_name {
        Some(name) => Some(
            node.interface_by_name(&name)
                .ok_or_else(|| Error::NoSuchInterface(name))?,
        ),
        None => None,
    };
    let mut packet = hdr.to_vec();
    packet.extend_from_slice(payload);
    demote_to_l2(node, next_hop, oif, &packet, ETHERTYPE_IPV4)
}

/// Wraps `packet` in an Ethernet frame towards `next_hop` and sends it.
///
/// With no egress supplied, the interface is chosen by subnet match
/// against the next hop.  An ARP miss triggers a resolution and drops the
/// packet; there is no queue and no retry.
pub(crate) fn demote_to_l2(
    node: &Arc<Node>,
    next_hop: Ipv4Address,
    oif: Option<Arc<Interface>>,
    packet: &[u8],
    ethertype: u16,
) -> Result<()> {
    let oif = match oif {
        Some(oif) => oif,
        None => match node.matching_subnet_interface(next_hop) {
            Some(oif) => oif,
            None => {
                warn!("{}: no eligible subnet for {}", node.name(), next_hop);
                return Err(Error::NoEligibleSubnet(next_hop));
            }
        },
    };
    let entry = match node.arp_table().lookup(next_hop) {
        Some(entry) => entry,
        None => {
            debug!(
                "{}: ARP miss for {}; resolving and dropping the packet",
                node.name(),
                next_hop
            );
            return arp::send_broadcast_request(node, Some(oif), next_hop);
        }
    };
    let frame = frame::build_frame(entry.mac, oif.mac(), ethertype, packet);
    phys::send_on_interface(&oif, frame.bytes())
}

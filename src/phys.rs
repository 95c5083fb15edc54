/*! Physical emulation: loopback datagrams standing in for wires.

Every node owns a datagram endpoint on 127.0.0.1.  Sending a frame out of
an interface resolves the peer interface across the link, prepends the
peer's name as a fixed 16-byte routing field, and ships the lot to the peer
node's port as one datagram:

```text
| 16-byte dst-interface-name (NUL-padded) | Ethernet frame bytes ... |
```

Receive workers strip the field, look the interface up on their node, and
hand the frame to the L2 ingress qualifier.
*/

use crate::error::{Error, Result};
use crate::frame::{FrameBuf, MAX_FRAME_BUFFER};
use crate::l2;
use crate::topology::{Interface, Node, MAX_INTF_NAME_LEN};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::thread;
use tracing::*;

/// Opens a node's receive endpoint.  Failure leaves the node's receive
/// side inert; the node itself is still usable.
pub(crate) fn open_endpoint(node_name: &str, port: u16) -> Option<UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    match UdpSocket::bind(addr) {
        Ok(socket) => Some(socket),
        Err(e) => {
            warn!("node {}: endpoint bind on port {} failed: {}", node_name, port, e);
            None
        }
    }
}

/// Sends `frame` out of `intf` to the interface on the other side of its
/// link.
pub(crate) fn send_on_interface(intf: &Interface, frame: &[u8]) -> Result<()> {
    let peer = intf
        .peer()
        .ok_or_else(|| Error::NotLinked(intf.name().to_string()))?;
    let peer_node = peer
        .node()
        .ok_or_else(|| Error::NotLinked(peer.name().to_string()))?;

    let mut datagram = Vec::with_capacity(MAX_INTF_NAME_LEN + frame.len());
    let mut name_field = [0u8; MAX_INTF_NAME_LEN];
    name_field[..peer.name().len()].copy_from_slice(peer.name().as_bytes());
    datagram.extend_from_slice(&name_field);
    datagram.extend_from_slice(frame);

    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
    let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, peer_node.udp_port());
    socket.send_to(&datagram, dest)?;
    trace!(
        "{} -> {}.{}: {} bytes",
        intf.name(),
        peer_node.name(),
        peer.name(),
        frame.len()
    );
    Ok(())
}

/// One datagram off the wire: strip the interface-name field, find the
/// interface, and start the frame's ingress journey.
fn deliver(node: &Arc<Node>, datagram: &[u8]) {
    if datagram.len() < MAX_INTF_NAME_LEN {
        warn!("node {}: runt datagram ({} bytes)", node.name(), datagram.len());
        return;
    }
    let name_field = &datagram[..MAX_INTF_NAME_LEN];
    let name_len = name_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(MAX_INTF_NAME_LEN);
    let if_name = match std::str::from_utf8(&name_field[..name_len]) {
        Ok(name) => name,
        Err(_) => {
            warn!("node {}: undecodable interface name field", node.name());
            return;
        }
    };
    let intf = match node.interface_by_name(if_name) {
        Some(intf) => intf,
        None => {
            warn!(
                "node {}: packet received on unknown interface {}",
                node.name(),
                if_name
            );
            return;
        }
    };
    // Copying to the buffer tail leaves headroom for VLAN insertion
    let frame = FrameBuf::from_frame(&datagram[MAX_INTF_NAME_LEN..]);
    l2::frame_recv(node, &intf, frame);
}

/// Spawns the detached receive worker for one node.  The worker owns its
/// scratch buffer, never hands it to the stack without copy, and runs for
/// the process lifetime; there is no shutdown.
pub(crate) fn spawn_node_receiver(node: &Arc<Node>) {
    let socket = match node.socket() {
        Some(socket) => match socket.try_clone() {
            Ok(socket) => socket,
            Err(e) => {
                warn!("node {}: cannot clone endpoint: {}", node.name(), e);
                return;
            }
        },
        None => {
            debug!("node {}: no endpoint, receive side inert", node.name());
            return;
        }
    };
    let node = node.clone();
    let node_for_err = node.clone();
    let spawned = thread::Builder::new()
        .name(format!("rx-{}", node.name()))
        .spawn(move || {
            let mut scratch = [0u8; MAX_FRAME_BUFFER];
            loop {
                match socket.recv_from(&mut scratch) {
                    Ok((len, _sender)) => deliver(&node, &scratch[..len]),
                    Err(e) => {
                        warn!("node {}: endpoint recv failed: {}", node.name(), e);
                        return;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(
            "node {}: cannot spawn receive worker: {}",
            node_for_err.name(),
            e
        );
    }
}

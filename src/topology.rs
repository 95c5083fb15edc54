/*! The topology graph: nodes, bounded interface slots, and links.

Back-references (Interface ↔ Node ↔ Link) form a cycle, broken with
`Weak`: a link owns its two endpoint interfaces, a node's slots hold
strong references to the interfaces plugged into it, and each interface
points weakly back at its owning node and link.
*/

use crate::addr::{Ipv4Address, MacAddress};
use crate::error::{Error, Result};
use crate::phys;
use crate::tables::{ArpTable, MacTable, RoutingTable};
use std::fmt;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::*;

/// Interface slots per node.
pub const MAX_INTF_PER_NODE: usize = 10;
/// Interface names are truncated to this many bytes; the on-wire datagram
/// header reserves exactly this much for the recipient interface name.
pub const MAX_INTF_NAME_LEN: usize = 16;
/// VLAN membership slots per interface; VLAN id 0 marks an empty slot.
pub const MAX_VLAN_MEMBERSHIPS: usize = 10;

const MAX_NODE_NAME_LEN: usize = 16;
const MAX_TOPOLOGY_NAME_LEN: usize = 32;

/// Every node's endpoint gets the next port off this counter.  Process-wide
/// so that endpoint ports stay unique even across topologies.
static NEXT_UDP_PORT: AtomicU16 = AtomicU16::new(40000);

fn truncate_name(name: &str, max: usize) -> String {
    let mut end = name.len().min(max);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

fn name_hash(s: &str) -> u64 {
    s.bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(97).wrapping_add(u64::from(b)))
}

/// Deterministic MAC for an interface: derived from the hash of its own
/// name combined with its node's name, folded to 48 bits.
fn derive_mac(if_name: &str, node_name: &str) -> MacAddress {
    let hash = name_hash(if_name).wrapping_mul(name_hash(node_name));
    MacAddress::from_u64(hash & 0x0000_FFFF_FFFF_FFFF)
}

/// Layer-2 operating mode of an interface.
///
/// Mutually exclusive with L3 mode: an interface is L3 iff it has an IP
/// address, and configuring either side clears the other.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum L2Mode {
    Access,
    Trunk,
    Unknown,
}

impl Default for L2Mode {
    fn default() -> L2Mode {
        L2Mode::Unknown
    }
}

impl fmt::Display for L2Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L2Mode::Access => write!(f, "access"),
            L2Mode::Trunk => write!(f, "trunk"),
            L2Mode::Unknown => write!(f, "not configured"),
        }
    }
}

/// The network-facing state of one interface.
#[derive(Clone, Debug)]
pub struct InterfaceState {
    mac: MacAddress,
    ip: Option<(Ipv4Address, u8)>,
    l2_mode: L2Mode,
    vlans: [u16; MAX_VLAN_MEMBERSHIPS],
}

impl InterfaceState {
    pub(crate) fn new(mac: MacAddress) -> InterfaceState {
        InterfaceState {
            mac,
            ip: None,
            l2_mode: L2Mode::Unknown,
            vlans: [0; MAX_VLAN_MEMBERSHIPS],
        }
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn ip(&self) -> Option<(Ipv4Address, u8)> {
        self.ip
    }

    pub fn l2_mode(&self) -> L2Mode {
        self.l2_mode
    }

    /// An interface is in L3 mode iff it has an IP address.
    pub fn is_l3_mode(&self) -> bool {
        self.ip.is_some()
    }

    /// The single VLAN of an Access interface, if one is configured.
    pub fn access_vlan(&self) -> Option<u16> {
        if self.vlans[0] != 0 {
            Some(self.vlans[0])
        } else {
            None
        }
    }

    pub fn is_vlan_member(&self, vid: u16) -> bool {
        vid != 0 && self.vlans.contains(&vid)
    }

    pub fn vlans(&self) -> Vec<u16> {
        self.vlans.iter().copied().filter(|&v| v != 0).collect()
    }

    /// Does `ip` fall inside this interface's subnet?
    pub fn subnet_contains(&self, ip: Ipv4Address) -> bool {
        match self.ip {
            Some((own, mask)) => own.apply_mask(mask) == ip.apply_mask(mask),
            None => false,
        }
    }

    pub(crate) fn set_ip(&mut self, ip: Ipv4Address, mask: u8) {
        self.ip = Some((ip, mask));
        // L3 and L2 modes are mutually exclusive
        self.l2_mode = L2Mode::Unknown;
        self.vlans = [0; MAX_VLAN_MEMBERSHIPS];
    }

    pub(crate) fn unset_ip(&mut self) {
        self.ip = None;
    }

    pub(crate) fn set_l2_mode(&mut self, mode: L2Mode) {
        if mode == L2Mode::Unknown {
            warn!("refusing to set an interface's L2 mode to {}", mode);
            return;
        }
        let old = self.l2_mode;
        self.l2_mode = mode;
        if self.ip.take().is_some() {
            return;
        }
        if old == L2Mode::Trunk && mode == L2Mode::Access {
            self.vlans = [0; MAX_VLAN_MEMBERSHIPS];
        }
    }

    pub(crate) fn set_vlan_membership(&mut self, vid: u16) {
        if vid == 0 {
            warn!("VLAN id 0 is reserved");
            return;
        }
        if self.is_l3_mode() {
            warn!("cannot join VLAN {}: interface is in L3 mode", vid);
            return;
        }
        match self.l2_mode {
            L2Mode::Access => {
                self.vlans = [0; MAX_VLAN_MEMBERSHIPS];
                self.vlans[0] = vid;
            }
            L2Mode::Trunk => {
                if self.vlans.contains(&vid) {
                    return;
                }
                match self.vlans.iter_mut().find(|v| **v == 0) {
                    Some(slot) => *slot = vid,
                    None => warn!("VLAN membership is full, dropping VLAN {}", vid),
                }
            }
            L2Mode::Unknown => {
                warn!("cannot join VLAN {}: L2 mode is not configured", vid);
            }
        }
    }
}

/// One endpoint of a link, plugged into a node's interface slot.
pub struct Interface {
    name: String,
    node: Weak<Node>,
    link: Weak<Link>,
    state: Mutex<InterfaceState>,
}

impl Interface {
    fn new(name: &str, node: &Arc<Node>, link: Weak<Link>) -> Interface {
        let name = truncate_name(name, MAX_INTF_NAME_LEN);
        let mac = derive_mac(&name, node.name());
        Interface {
            name,
            node: Arc::downgrade(node),
            link,
            state: Mutex::new(InterfaceState::new(mac)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.upgrade()
    }

    pub fn link(&self) -> Option<Arc<Link>> {
        self.link.upgrade()
    }

    /// The interface on the other side of the link.
    pub fn peer(&self) -> Option<Arc<Interface>> {
        self.link()?.other(self)
    }

    pub(crate) fn state(&self) -> InterfaceState {
        self.state.lock().unwrap().clone()
    }

    pub fn mac(&self) -> MacAddress {
        self.state.lock().unwrap().mac()
    }

    pub fn ip(&self) -> Option<(Ipv4Address, u8)> {
        self.state.lock().unwrap().ip()
    }

    pub fn is_l3_mode(&self) -> bool {
        self.state.lock().unwrap().is_l3_mode()
    }

    pub fn l2_mode(&self) -> L2Mode {
        self.state.lock().unwrap().l2_mode()
    }

    pub fn vlans(&self) -> Vec<u16> {
        self.state.lock().unwrap().vlans()
    }

    pub fn set_ip(&self, ip: Ipv4Address, mask: u8) {
        self.state.lock().unwrap().set_ip(ip, mask);
    }

    pub fn unset_ip(&self) {
        self.state.lock().unwrap().unset_ip();
    }

    pub fn set_l2_mode(&self, mode: L2Mode) {
        self.state.lock().unwrap().set_l2_mode(mode);
    }

    pub fn set_vlan_membership(&self, vid: u16) {
        self.state.lock().unwrap().set_vlan_membership(vid);
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(f, "{}: MAC {}", self.name, state.mac())?;
        if let Some((ip, mask)) = state.ip() {
            write!(f, ", IP {}/{}", ip, mask)?;
        } else if state.l2_mode() != L2Mode::Unknown {
            write!(f, ", L2 {}", state.l2_mode())?;
            let vlans: Vec<String> = state.vlans().iter().map(u16::to_string).collect();
            if !vlans.is_empty() {
                write!(f, " vlan {}", vlans.join(","))?;
            }
        }
        if let Some(peer) = self.peer() {
            if let Some(nbr) = peer.node() {
                write!(f, " <-> {}.{}", nbr.name(), peer.name())?;
            }
        }
        Ok(())
    }
}

/// A network node: bounded interface slots, per-node tables, and a private
/// receive endpoint on the loopback transport.
pub struct Node {
    name: String,
    port: u16,
    socket: Option<UdpSocket>,
    slots: Mutex<Vec<Option<Arc<Interface>>>>,
    loopback: Mutex<Option<Ipv4Address>>,
    arp_table: ArpTable,
    mac_table: MacTable,
    routing_table: RoutingTable,
}

impl Node {
    fn new(name: &str) -> Node {
        let name = truncate_name(name, MAX_NODE_NAME_LEN);
        let port = NEXT_UDP_PORT.fetch_add(1, Ordering::Relaxed);
        let socket = phys::open_endpoint(&name, port);
        let mut slots = Vec::with_capacity(MAX_INTF_PER_NODE);
        slots.resize_with(MAX_INTF_PER_NODE, || None);
        Node {
            name,
            port,
            socket,
            slots: Mutex::new(slots),
            loopback: Mutex::new(None),
            arp_table: ArpTable::new(),
            mac_table: MacTable::new(),
            routing_table: RoutingTable::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn udp_port(&self) -> u16 {
        self.port
    }

    pub(crate) fn socket(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }

    pub fn loopback(&self) -> Option<Ipv4Address> {
        *self.loopback.lock().unwrap()
    }

    /// The node's management IP, independent of any interface address.
    pub fn set_loopback(&self, ip: Ipv4Address) {
        *self.loopback.lock().unwrap() = Some(ip);
    }

    pub fn arp_table(&self) -> &ArpTable {
        &self.arp_table
    }

    pub fn mac_table(&self) -> &MacTable {
        &self.mac_table
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Snapshot of the occupied interface slots, in slot order.
    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter_map(|slot| slot.clone())
            .collect()
    }

    pub fn interface_by_name(&self, if_name: &str) -> Option<Arc<Interface>> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter_map(|slot| slot.as_ref())
            .find(|intf| intf.name() == if_name)
            .cloned()
    }

    /// The first L3 interface whose subnet contains `ip`.
    pub fn matching_subnet_interface(&self, ip: Ipv4Address) -> Option<Arc<Interface>> {
        self.interfaces()
            .into_iter()
            .find(|intf| intf.state().subnet_contains(ip))
    }

    /// Whether `ip` is the loopback or any interface address of this node.
    pub fn is_local_address(&self, ip: Ipv4Address) -> bool {
        if self.loopback() == Some(ip) {
            return true;
        }
        self.interfaces()
            .iter()
            .any(|intf| intf.ip().map(|(own, _)| own) == Some(ip))
    }

    pub fn has_vacant_slot(&self) -> bool {
        self.slots.lock().unwrap().iter().any(|slot| slot.is_none())
    }

    fn attach(&self, intf: Arc<Interface>) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(intf);
                true
            }
            None => false,
        }
    }

    fn detach(&self, intf: &Arc<Interface>) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            let occupied = match slot {
                Some(existing) => Arc::ptr_eq(existing, intf),
                None => false,
            };
            if occupied {
                *slot = None;
            }
        }
    }

    pub fn set_interface_ip(&self, if_name: &str, ip: Ipv4Address, mask: u8) -> Result<()> {
        let intf = self
            .interface_by_name(if_name)
            .ok_or_else(|| Error::NoSuchInterface(if_name.to_string()))?;
        intf.set_ip(ip, mask);
        Ok(())
    }

    pub fn unset_interface_ip(&self, if_name: &str) -> Result<()> {
        let intf = self
            .interface_by_name(if_name)
            .ok_or_else(|| Error::NoSuchInterface(if_name.to_string()))?;
        intf.unset_ip();
        Ok(())
    }

    pub fn set_interface_l2_mode(&self, if_name: &str, mode: L2Mode) -> Result<()> {
        let intf = self
            .interface_by_name(if_name)
            .ok_or_else(|| Error::NoSuchInterface(if_name.to_string()))?;
        intf.set_l2_mode(mode);
        Ok(())
    }

    pub fn set_interface_vlan(&self, if_name: &str, vid: u16) -> Result<()> {
        let intf = self
            .interface_by_name(if_name)
            .ok_or_else(|| Error::NoSuchInterface(if_name.to_string()))?;
        intf.set_vlan_membership(vid);
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {} (port {})", self.name, self.port)?;
        if let Some(lo) = self.loopback() {
            write!(f, ", loopback {}", lo)?;
        }
        writeln!(f)?;
        for intf in self.interfaces() {
            writeln!(f, "  {}", intf)?;
        }
        Ok(())
    }
}

/// A link binding two interfaces, one per endpoint node.
pub struct Link {
    intf1: Arc<Interface>,
    intf2: Arc<Interface>,
    cost: u32,
}

impl Link {
    pub fn endpoints(&self) -> (&Arc<Interface>, &Arc<Interface>) {
        (&self.intf1, &self.intf2)
    }

    /// The endpoint that isn't `intf`.
    pub fn other(&self, intf: &Interface) -> Option<Arc<Interface>> {
        if std::ptr::eq(self.intf1.as_ref(), intf) {
            Some(self.intf2.clone())
        } else if std::ptr::eq(self.intf2.as_ref(), intf) {
            Some(self.intf1.clone())
        } else {
            None
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

/// A named collection of nodes with insertion-order iteration.
pub struct Graph {
    name: String,
    nodes: Mutex<Vec<Arc<Node>>>,
    links: Mutex<Vec<Arc<Link>>>,
}

impl Graph {
    pub fn new(name: &str) -> Graph {
        Graph {
            name: truncate_name(name, MAX_TOPOLOGY_NAME_LEN),
            nodes: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a node; its receive endpoint opens here and stays open for
    /// the node's lifetime.
    pub fn add_node(&self, name: &str) -> Arc<Node> {
        let node = Arc::new(Node::new(name));
        self.nodes.lock().unwrap().push(node.clone());
        node
    }

    pub fn node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|node| node.name() == name)
            .cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().unwrap().clone()
    }

    /// Creates a link between two nodes, allocating an interface into a
    /// vacant slot on each and assigning both interface MACs.
    pub fn insert_link(
        &self,
        node1: &Arc<Node>,
        node2: &Arc<Node>,
        from_if_name: &str,
        to_if_name: &str,
        cost: u32,
    ) -> Result<Arc<Link>> {
        if !node1.has_vacant_slot() {
            return Err(Error::NoVacantSlot(node1.name().to_string()));
        }
        if !node2.has_vacant_slot() {
            return Err(Error::NoVacantSlot(node2.name().to_string()));
        }
        let link = Arc::new_cyclic(|weak: &Weak<Link>| Link {
            intf1: Arc::new(Interface::new(from_if_name, node1, weak.clone())),
            intf2: Arc::new(Interface::new(to_if_name, node2, weak.clone())),
            cost,
        });
        if !node1.attach(link.intf1.clone()) {
            return Err(Error::NoVacantSlot(node1.name().to_string()));
        }
        if !node2.attach(link.intf2.clone()) {
            node1.detach(&link.intf1);
            return Err(Error::NoVacantSlot(node2.name().to_string()));
        }
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }

    /// Destroys a link, detaching both endpoint interfaces from their
    /// nodes' slots.
    pub fn remove_link(&self, link: &Arc<Link>) {
        if let Some(node) = link.intf1.node() {
            node.detach(&link.intf1);
        }
        if let Some(node) = link.intf2.node() {
            node.detach(&link.intf2);
        }
        self.links
            .lock()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, link));
    }

    /// Starts the receive fabric: one detached worker per node, each
    /// draining its node's endpoint for the process lifetime.  Nodes added
    /// after this call get no worker.
    pub fn start_receiver(&self) {
        for node in self.nodes() {
            phys::spawn_node_receiver(&node);
        }
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Topology: {}", self.name)?;
        for node in self.nodes() {
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}

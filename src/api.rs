/*! Engine entry points for an operator front end.

The command parser itself lives outside this crate; its contract is that
it hands over already-tokenised scalars and maps `Ok` to exit code 0 and
`Err` to a non-zero code with the error's one-line `Display`.
*/

use crate::addr::Ipv4Address;
use crate::arp;
use crate::error::{Error, Result};
use crate::l3;
use crate::topology::{Graph, Node};
use std::sync::Arc;

fn node(graph: &Graph, name: &str) -> Result<Arc<Node>> {
    graph
        .node_by_name(name)
        .ok_or_else(|| Error::NoSuchNode(name.to_string()))
}

/// `show topology`
pub fn show_topology(graph: &Graph) -> String {
    graph.to_string()
}

/// `show node <name> arp`
pub fn show_node_arp(graph: &Graph, node_name: &str) -> Result<String> {
    Ok(node(graph, node_name)?.arp_table().to_string())
}

/// `show node <name> mac`
pub fn show_node_mac(graph: &Graph, node_name: &str) -> Result<String> {
    Ok(node(graph, node_name)?.mac_table().to_string())
}

/// `show node <name> rt`
pub fn show_node_rt(graph: &Graph, node_name: &str) -> Result<String> {
    Ok(node(graph, node_name)?.routing_table().to_string())
}

/// `run node <name> resolve-arp <ip>`
pub fn resolve_arp(graph: &Graph, node_name: &str, ip: &str) -> Result<()> {
    let node = node(graph, node_name)?;
    let ip: Ipv4Address = ip.parse()?;
    arp::send_broadcast_request(&node, None, ip)
}

/// `run node <name> ping <ip>`
pub fn ping(graph: &Graph, node_name: &str, ip: &str) -> Result<()> {
    let node = node(graph, node_name)?;
    let ip: Ipv4Address = ip.parse()?;
    l3::ping(&node, ip)
}

/// `config node <name> route <dest> <mask> [<gw-ip> <oif>]`
///
/// A route without a gateway is installed as directly attached.
pub fn route_add(
    graph: &Graph,
    node_name: &str,
    dest: &str,
    mask: u8,
    gateway: Option<&str>,
    oif: Option<&str>,
) -> Result<()> {
    let node = node(graph, node_name)?;
    let dest: Ipv4Address = dest.parse()?;
    let gateway = match gateway {
        Some(gw) => Some(gw.parse::<Ipv4Address>()?),
        None => None,
    };
    node.routing_table().add(dest, mask, gateway, oif);
    Ok(())
}

/// `config no node <name> route <dest> <mask>`
pub fn route_del(graph: &Graph, node_name: &str, dest: &str, mask: u8) -> Result<()> {
    let node = node(graph, node_name)?;
    let dest: Ipv4Address = dest.parse()?;
    node.routing_table().delete(dest, mask);
    Ok(())
}

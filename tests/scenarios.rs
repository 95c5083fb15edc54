//! End-to-end scenarios over the real loopback fabric.
//!
//! The fabric is asynchronous (frames cross a real datagram socket and a
//! receive worker), so assertions on table state go through a bounded
//! retry loop.

use simstack::api;
use simstack::frame::{self, Ipv4Hdr, ETHERTYPE_IPV4};
use simstack::{Graph, Ipv4Address, L2Mode, MacAddress, Node};
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logs() {
    // tracing carries the "log" feature, so env_logger surfaces the engine's
    // drop/dispatch lines under RUST_LOG
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ip(s: &str) -> Ipv4Address {
    s.parse().unwrap()
}

fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn topology_plumbing() {
    init_logs();
    let graph = Graph::new("plumbing");
    let a = graph.add_node("A");
    let b = graph.add_node("B");
    assert_ne!(a.udp_port(), b.udp_port());

    let link = graph.insert_link(&a, &b, "eth0", "eth1", 5).unwrap();
    assert_eq!(link.cost(), 5);

    let a0 = a.interface_by_name("eth0").unwrap();
    assert_eq!(a0.node().unwrap().name(), "A");
    assert_eq!(a0.peer().unwrap().name(), "eth1");
    assert_eq!(a0.peer().unwrap().node().unwrap().name(), "B");
    // MACs were assigned at link creation
    assert_ne!(a0.mac(), MacAddress::ZERO);
    assert_ne!(a0.mac(), b.interface_by_name("eth1").unwrap().mac());

    let rendered = api::show_topology(&graph);
    assert!(rendered.contains("Node A"));
    assert!(rendered.contains("eth1"));
    assert!(api::show_node_arp(&graph, "nope").is_err());

    graph.remove_link(&link);
    assert!(a.interface_by_name("eth0").is_none());
    assert!(b.interface_by_name("eth1").is_none());
}

#[test]
fn interface_slots_are_bounded() {
    init_logs();
    let graph = Graph::new("hub");
    let hub = graph.add_node("hub");
    for i in 0..10 {
        let spoke = graph.add_node(&format!("S{}", i));
        graph
            .insert_link(&hub, &spoke, &format!("eth0/{}", i), "eth0", 1)
            .unwrap();
    }
    let extra = graph.add_node("S10");
    assert!(graph.insert_link(&hub, &extra, "eth0/10", "eth0", 1).is_err());
}

/// S1: a resolve on one side fills both ARP caches.
#[test]
fn arp_resolution_fills_both_caches() {
    init_logs();
    let graph = Graph::new("two-hosts");
    let a = graph.add_node("A");
    let b = graph.add_node("B");
    graph.insert_link(&a, &b, "eth0", "eth0", 1).unwrap();
    a.set_interface_ip("eth0", ip("10.0.0.1"), 24).unwrap();
    b.set_interface_ip("eth0", ip("10.0.0.2"), 24).unwrap();
    graph.start_receiver();

    api::resolve_arp(&graph, "A", "10.0.0.2").unwrap();

    let a_mac = a.interface_by_name("eth0").unwrap().mac();
    let b_mac = b.interface_by_name("eth0").unwrap().mac();
    assert!(eventually(|| a.arp_table().lookup(ip("10.0.0.2")).is_some()));
    let entry = a.arp_table().lookup(ip("10.0.0.2")).unwrap();
    assert_eq!(entry.mac, b_mac);
    assert_eq!(entry.oif, "eth0");

    assert!(eventually(|| b.arp_table().lookup(ip("10.0.0.1")).is_some()));
    let entry = b.arp_table().lookup(ip("10.0.0.1")).unwrap();
    assert_eq!(entry.mac, a_mac);
    assert_eq!(entry.oif, "eth0");
}

/// A resolve for an IP outside every interface subnet fails up front.
#[test]
fn arp_resolution_needs_an_eligible_subnet() {
    init_logs();
    let graph = Graph::new("lonely");
    let a = graph.add_node("A");
    let b = graph.add_node("B");
    graph.insert_link(&a, &b, "eth0", "eth0", 1).unwrap();
    a.set_interface_ip("eth0", ip("10.0.0.1"), 24).unwrap();
    assert!(api::resolve_arp(&graph, "A", "192.168.1.1").is_err());
}

/// S2: a broadcast into a four-port access switch floods and teaches the
/// MAC table.
#[test]
fn switch_learns_and_floods() {
    init_logs();
    let graph = Graph::new("star");
    let sw = graph.add_node("SW");
    let mut hosts: Vec<Arc<Node>> = Vec::new();
    for i in 1..=4 {
        let host = graph.add_node(&format!("H{}", i));
        let sw_port = format!("eth0/{}", i);
        graph.insert_link(&sw, &host, &sw_port, "eth0", 1).unwrap();
        host.set_interface_ip("eth0", ip(&format!("10.0.0.{}", i)), 24)
            .unwrap();
        sw.set_interface_l2_mode(&sw_port, L2Mode::Access).unwrap();
        sw.set_interface_vlan(&sw_port, 10).unwrap();
        hosts.push(host);
    }
    graph.start_receiver();

    api::resolve_arp(&graph, "H1", "10.0.0.2").unwrap();

    let h1_mac = hosts[0].interface_by_name("eth0").unwrap().mac();
    let h2_mac = hosts[1].interface_by_name("eth0").unwrap().mac();

    // the switch learned H1 behind the port the broadcast came in on
    assert!(eventually(|| sw.mac_table().lookup(h1_mac).is_some()));
    assert_eq!(sw.mac_table().lookup(h1_mac).unwrap().oif, "eth0/1");

    // the flood reached H2; its reply came back through the switch
    assert!(eventually(|| hosts[0]
        .arp_table()
        .lookup(ip("10.0.0.2"))
        .is_some()));
    assert_eq!(
        hosts[0].arp_table().lookup(ip("10.0.0.2")).unwrap().mac,
        h2_mac
    );
    assert!(eventually(|| sw.mac_table().lookup(h2_mac).is_some()));
    assert_eq!(sw.mac_table().lookup(h2_mac).unwrap().oif, "eth0/2");
}

/// S3: across a trunk, a broadcast stays inside its VLAN.  H2 and H4
/// carry the same IP in different VLANs; only the VLAN-10 host may answer.
#[test]
fn trunk_keeps_vlans_apart() {
    init_logs();
    let graph = Graph::new("dual-switch");
    let sw1 = graph.add_node("SW1");
    let sw2 = graph.add_node("SW2");
    let h1 = graph.add_node("H1");
    let h2 = graph.add_node("H2");
    let h4 = graph.add_node("H4");

    graph.insert_link(&sw1, &h1, "eth0/1", "eth0", 1).unwrap();
    graph.insert_link(&sw1, &sw2, "eth0/2", "eth0/1", 1).unwrap();
    graph.insert_link(&sw2, &h2, "eth0/2", "eth0", 1).unwrap();
    graph.insert_link(&sw2, &h4, "eth0/3", "eth0", 1).unwrap();

    h1.set_interface_ip("eth0", ip("10.0.0.1"), 24).unwrap();
    h2.set_interface_ip("eth0", ip("10.0.0.2"), 24).unwrap();
    h4.set_interface_ip("eth0", ip("10.0.0.2"), 24).unwrap();

    sw1.set_interface_l2_mode("eth0/1", L2Mode::Access).unwrap();
    sw1.set_interface_vlan("eth0/1", 10).unwrap();
    sw1.set_interface_l2_mode("eth0/2", L2Mode::Trunk).unwrap();
    sw1.set_interface_vlan("eth0/2", 10).unwrap();
    sw1.set_interface_vlan("eth0/2", 11).unwrap();

    sw2.set_interface_l2_mode("eth0/1", L2Mode::Trunk).unwrap();
    sw2.set_interface_vlan("eth0/1", 10).unwrap();
    sw2.set_interface_vlan("eth0/1", 11).unwrap();
    sw2.set_interface_l2_mode("eth0/2", L2Mode::Access).unwrap();
    sw2.set_interface_vlan("eth0/2", 10).unwrap();
    sw2.set_interface_l2_mode("eth0/3", L2Mode::Access).unwrap();
    sw2.set_interface_vlan("eth0/3", 11).unwrap();

    graph.start_receiver();

    api::resolve_arp(&graph, "H1", "10.0.0.2").unwrap();

    let h2_mac = h2.interface_by_name("eth0").unwrap().mac();
    assert!(eventually(|| h1.arp_table().lookup(ip("10.0.0.2")).is_some()));
    // the answer came from the VLAN-10 twin, not the VLAN-11 one
    assert_eq!(h1.arp_table().lookup(ip("10.0.0.2")).unwrap().mac, h2_mac);

    // the VLAN-11 host never saw the request
    thread::sleep(Duration::from_millis(200));
    assert!(h4.arp_table().is_empty());
}

/// S5: a forwarded packet arriving with TTL 1 dies at the router and never
/// reaches the demote path; with TTL 2 the router tries to resolve the
/// next hop (and drops the packet, since nothing is queued).
#[test]
fn ttl_expiry_stops_forwarding() {
    init_logs();
    let graph = Graph::new("forwarding");
    let a = graph.add_node("A");
    let r = graph.add_node("R");
    let b = graph.add_node("B");
    graph.insert_link(&a, &r, "eth0", "eth0", 1).unwrap();
    graph.insert_link(&r, &b, "eth1", "eth0", 1).unwrap();
    a.set_interface_ip("eth0", ip("10.0.0.1"), 24).unwrap();
    r.set_interface_ip("eth0", ip("10.0.0.2"), 24).unwrap();
    r.set_interface_ip("eth1", ip("11.0.0.1"), 24).unwrap();
    b.set_interface_ip("eth0", ip("11.0.0.2"), 24).unwrap();
    api::route_add(&graph, "R", "12.0.0.0", 8, Some("11.0.0.2"), Some("eth1")).unwrap();
    assert!(api::show_node_rt(&graph, "R").unwrap().contains("12.0.0.0/8"));
    graph.start_receiver();

    let r_eth0_mac = r.interface_by_name("eth0").unwrap().mac();
    let inject = |ttl: u8| {
        let mut hdr = Ipv4Hdr::originate(ip("10.0.0.1"), ip("12.0.0.1"), 0, 0);
        hdr.ttl = ttl;
        let frame = frame::build_frame(
            r_eth0_mac,
            MacAddress::from_u64(0x0000_4242_4242),
            ETHERTYPE_IPV4,
            &hdr.to_vec(),
        );
        let mut datagram = vec![0u8; 16];
        datagram[..4].copy_from_slice(b"eth0");
        datagram.extend_from_slice(frame.bytes());
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .send_to(&datagram, ("127.0.0.1", r.udp_port()))
            .unwrap();
    };

    inject(1);
    thread::sleep(Duration::from_millis(300));
    assert!(
        r.arp_table().lookup(ip("11.0.0.2")).is_none(),
        "a TTL-expired packet must not trigger next-hop resolution"
    );

    inject(2);
    // the forward path hits an ARP miss, resolves, and B's reply lands
    assert!(eventually(|| r.arp_table().lookup(ip("11.0.0.2")).is_some()));
}

/// S6 + ping: the first ping resolves the next hop and is dropped, the
/// second reaches the destination's loopback for local delivery.
#[test]
fn ping_reaches_a_loopback_across_the_link() {
    init_logs();
    let graph = Graph::new("ping");
    let a = graph.add_node("A");
    let n = graph.add_node("N");
    graph.insert_link(&a, &n, "eth0", "eth0", 1).unwrap();
    a.set_interface_ip("eth0", ip("10.0.0.1"), 24).unwrap();
    n.set_interface_ip("eth0", ip("10.0.0.2"), 24).unwrap();
    n.set_loopback(ip("122.1.1.1"));
    n.routing_table().add_direct(ip("122.1.1.1"), 32);
    api::route_add(&graph, "A", "122.1.1.1", 32, Some("10.0.0.2"), Some("eth0")).unwrap();
    graph.start_receiver();

    // no route yet for the reverse direction is fine; ping is one-way here
    api::ping(&graph, "A", "122.1.1.1").unwrap();
    assert!(eventually(|| a.arp_table().lookup(ip("10.0.0.2")).is_some()));

    // resolved now; this one goes all the way and is delivered locally
    api::ping(&graph, "A", "122.1.1.1").unwrap();
    thread::sleep(Duration::from_millis(200));

    // the routed packet was consumed at N, not forwarded anywhere
    assert!(n.arp_table().lookup(ip("122.1.1.1")).is_none());

    api::route_del(&graph, "A", "122.1.1.1", 32).unwrap();
    assert!(api::ping(&graph, "A", "122.1.1.1").is_err());
}

/// A ping crossing a router: forwarded with a TTL decrement, resolved hop
/// by hop, delivered at the far loopback.
#[test]
fn ping_routes_across_a_router() {
    init_logs();
    let graph = Graph::new("routed-ping");
    let a = graph.add_node("A");
    let r = graph.add_node("R");
    let b = graph.add_node("B");
    graph.insert_link(&a, &r, "eth0", "eth0", 1).unwrap();
    graph.insert_link(&r, &b, "eth1", "eth0", 1).unwrap();
    a.set_interface_ip("eth0", ip("10.0.0.1"), 24).unwrap();
    r.set_interface_ip("eth0", ip("10.0.0.2"), 24).unwrap();
    r.set_interface_ip("eth1", ip("11.0.0.1"), 24).unwrap();
    b.set_interface_ip("eth0", ip("11.0.0.2"), 24).unwrap();
    b.set_loopback(ip("122.1.1.2"));
    b.routing_table().add_direct(ip("122.1.1.2"), 32);
    api::route_add(&graph, "A", "122.1.1.2", 32, Some("10.0.0.2"), Some("eth0")).unwrap();
    api::route_add(&graph, "R", "122.1.1.2", 32, Some("11.0.0.2"), Some("eth1")).unwrap();
    graph.start_receiver();

    // first attempt stalls on the A -> R resolution
    api::ping(&graph, "A", "122.1.1.2").unwrap();
    assert!(eventually(|| a.arp_table().lookup(ip("10.0.0.2")).is_some()));

    // second attempt reaches R, which stalls on the R -> B resolution
    api::ping(&graph, "A", "122.1.1.2").unwrap();
    assert!(eventually(|| r.arp_table().lookup(ip("11.0.0.2")).is_some()));
    // B learned the router while answering it
    assert!(eventually(|| b.arp_table().lookup(ip("11.0.0.1")).is_some()));

    // fully resolved now; this one goes end to end
    api::ping(&graph, "A", "122.1.1.2").unwrap();
    thread::sleep(Duration::from_millis(200));
}

/// Direct-host delivery: no gateway involved, the destination is its own
/// next hop.
#[test]
fn ping_a_directly_attached_host() {
    init_logs();
    let graph = Graph::new("direct");
    let a = graph.add_node("A");
    let n = graph.add_node("N");
    graph.insert_link(&a, &n, "eth0", "eth0", 1).unwrap();
    a.set_interface_ip("eth0", ip("10.0.0.1"), 24).unwrap();
    n.set_interface_ip("eth0", ip("10.0.0.2"), 24).unwrap();
    api::route_add(&graph, "A", "10.0.0.0", 24, None, None).unwrap();
    // the receiver consults its own table even for its own addresses
    n.routing_table().add_direct(ip("10.0.0.0"), 24);
    graph.start_receiver();

    api::ping(&graph, "A", "10.0.0.2").unwrap();
    assert!(eventually(|| a.arp_table().lookup(ip("10.0.0.2")).is_some()));
    // second attempt actually crosses the wire
    api::ping(&graph, "A", "10.0.0.2").unwrap();
    thread::sleep(Duration::from_millis(200));
}

/*! The three per-node tables: ARP cache, MAC table, routing table.

Each table carries its own mutex: the receive worker updates them while
operator threads read (or the other way round).  Lookups hand out clones so
no lock is held across engine work.
*/

use crate::addr::{Ipv4Address, MacAddress};
use std::fmt;
use std::sync::Mutex;

/// One resolved neighbour: IP, its MAC, and the interface it lives behind.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ArpEntry {
    pub ip: Ipv4Address,
    pub mac: MacAddress,
    pub oif: String,
}

/// IP → (MAC, egress interface).  One entry per IP.
#[derive(Default)]
pub struct ArpTable {
    entries: Mutex<Vec<ArpEntry>>,
}

impl ArpTable {
    pub fn new() -> ArpTable {
        ArpTable::default()
    }

    /// Inserts or replaces the entry for `ip`.
    pub fn update(&self, ip: Ipv4Address, mac: MacAddress, oif: &str) {
        let entry = ArpEntry {
            ip,
            mac,
            oif: oif.to_string(),
        };
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.ip == ip) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn lookup(&self, ip: Ipv4Address) -> Option<ArpEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.ip == ip)
            .cloned()
    }

    pub fn delete(&self, ip: Ipv4Address) {
        self.entries.lock().unwrap().retain(|e| e.ip != ip);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ArpTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries.lock().unwrap().iter() {
            writeln!(f, "{:<15} | {} | {}", entry.ip, entry.mac, entry.oif)?;
        }
        Ok(())
    }
}

/// One learned station: MAC and the interface it was seen behind.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MacEntry {
    pub mac: MacAddress,
    pub oif: String,
}

/// MAC → egress interface.  One entry per MAC; no aging.
#[derive(Default)]
pub struct MacTable {
    entries: Mutex<Vec<MacEntry>>,
}

impl MacTable {
    pub fn new() -> MacTable {
        MacTable::default()
    }

    /// Inserts or replaces the entry for `mac`.
    pub fn learn(&self, mac: MacAddress, oif: &str) {
        let entry = MacEntry {
            mac,
            oif: oif.to_string(),
        };
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.mac == mac) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn lookup(&self, mac: MacAddress) -> Option<MacEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.mac == mac)
            .cloned()
    }

    pub fn delete(&self, mac: MacAddress) {
        self.entries.lock().unwrap().retain(|e| e.mac != mac);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for MacTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries.lock().unwrap().iter() {
            writeln!(f, "{} | {}", entry.mac, entry.oif)?;
        }
        Ok(())
    }
}

/// A routing-table entry.  The destination is stored pre-masked.
///
/// A route with no gateway is *direct*: the subnet hangs off one of the
/// node's own interfaces and the destination IP is its own next hop.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Route {
    pub dest: Ipv4Address,
    pub mask: u8,
    pub gateway: Option<Ipv4Address>,
    pub oif: Option<String>,
}

impl Route {
    pub fn is_direct(&self) -> bool {
        self.gateway.is_none()
    }
}

/// Destination/prefix → gateway + egress, looked up by longest prefix.
#[derive(Default)]
pub struct RoutingTable {
    routes: Mutex<Vec<Route>>,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable::default()
    }

    /// Inserts or replaces the route for `(dest, mask)`.
    ///
    /// The destination is normalised through `apply_mask` before storage,
    /// so `10.1.2.7/24` and `10.1.2.0/24` name the same route.
    pub fn add(
        &self,
        dest: Ipv4Address,
        mask: u8,
        gateway: Option<Ipv4Address>,
        oif: Option<&str>,
    ) {
        let route = Route {
            dest: dest.apply_mask(mask),
            mask,
            gateway,
            oif: oif.map(str::to_string),
        };
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|r| !(r.dest == route.dest && r.mask == route.mask));
        routes.push(route);
    }

    /// Installs a directly-attached subnet: no gateway, no egress.
    pub fn add_direct(&self, dest: Ipv4Address, mask: u8) {
        self.add(dest, mask, None, None);
    }

    /// Removes by exact (normalised destination, mask).
    pub fn delete(&self, dest: Ipv4Address, mask: u8) {
        let dest = dest.apply_mask(mask);
        self.routes
            .lock()
            .unwrap()
            .retain(|r| !(r.dest == dest && r.mask == mask));
    }

    pub fn lookup_exact(&self, dest: Ipv4Address, mask: u8) -> Option<Route> {
        let dest = dest.apply_mask(mask);
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.dest == dest && r.mask == mask)
            .cloned()
    }

    /// Longest-prefix match: among routes whose masked destination covers
    /// `ip`, the one with the greatest mask; later insertions win ties.
    /// A 0.0.0.0/0 entry matches like any other.
    pub fn lookup_lpm(&self, ip: Ipv4Address) -> Option<Route> {
        let routes = self.routes.lock().unwrap();
        let mut best: Option<&Route> = None;
        for route in routes.iter() {
            if route.dest != ip.apply_mask(route.mask) {
                continue;
            }
            match best {
                Some(b) if b.mask > route.mask => {}
                _ => best = Some(route),
            }
        }
        best.cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for route in self.routes.lock().unwrap().iter() {
            let gateway = match route.gateway {
                Some(gw) => gw.to_string(),
                None => "NA".to_string(),
            };
            let oif = route.oif.as_deref().unwrap_or("NA");
            writeln!(f, "{}/{} | {} | {}", route.dest, route.mask, gateway, oif)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Address {
        s.parse().unwrap()
    }

    #[test]
    fn arp_update_replaces() {
        let table = ArpTable::new();
        let mac1 = MacAddress::from_u64(1);
        let mac2 = MacAddress::from_u64(2);
        table.update(ip("10.0.0.2"), mac1, "eth0");
        table.update(ip("10.0.0.2"), mac2, "eth1");
        assert_eq!(table.len(), 1);
        let entry = table.lookup(ip("10.0.0.2")).unwrap();
        assert_eq!(entry.mac, mac2);
        assert_eq!(entry.oif, "eth1");
    }

    #[test]
    fn arp_update_is_idempotent() {
        let table = ArpTable::new();
        let mac = MacAddress::from_u64(7);
        table.update(ip("10.0.0.2"), mac, "eth0");
        table.update(ip("10.0.0.2"), mac, "eth0");
        assert_eq!(table.len(), 1);
        table.delete(ip("10.0.0.2"));
        assert!(table.lookup(ip("10.0.0.2")).is_none());
    }

    #[test]
    fn mac_learning_replaces_on_move() {
        let table = MacTable::new();
        let mac = MacAddress::from_u64(0xAA);
        table.learn(mac, "eth0/1");
        assert_eq!(table.lookup(mac).unwrap().oif, "eth0/1");
        // station moved port
        table.learn(mac, "eth0/3");
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(mac).unwrap().oif, "eth0/3");
    }

    #[test]
    fn route_add_normalises_and_replaces() {
        let table = RoutingTable::new();
        table.add(ip("10.1.2.7"), 24, Some(ip("1.1.1.1")), Some("eth0"));
        assert_eq!(table.len(), 1);
        let route = table.lookup_exact(ip("10.1.2.0"), 24).unwrap();
        assert_eq!(route.dest, ip("10.1.2.0"));
        assert!(!route.is_direct());

        table.add(ip("10.1.2.0"), 24, Some(ip("2.2.2.2")), Some("eth1"));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup_exact(ip("10.1.2.0"), 24).unwrap().gateway,
            Some(ip("2.2.2.2"))
        );

        table.delete(ip("10.1.2.9"), 24);
        assert!(table.lookup_exact(ip("10.1.2.0"), 24).is_none());
    }

    #[test]
    fn lpm_prefers_the_longest_mask() {
        let table = RoutingTable::new();
        table.add(ip("10.0.0.0"), 8, Some(ip("1.0.0.1")), Some("oif1"));
        table.add(ip("10.1.0.0"), 16, Some(ip("2.0.0.1")), Some("oif2"));
        table.add(ip("10.1.2.0"), 24, Some(ip("3.0.0.1")), Some("oif3"));

        assert_eq!(table.lookup_lpm(ip("10.1.2.7")).unwrap().mask, 24);
        assert_eq!(table.lookup_lpm(ip("10.1.3.7")).unwrap().mask, 16);
        assert_eq!(table.lookup_lpm(ip("10.9.9.9")).unwrap().mask, 8);
        assert!(table.lookup_lpm(ip("11.0.0.1")).is_none());
    }

    #[test]
    fn lpm_default_route_is_not_special() {
        let table = RoutingTable::new();
        table.add(ip("0.0.0.0"), 0, Some(ip("9.9.9.9")), Some("up0"));
        table.add(ip("10.0.0.0"), 8, Some(ip("1.0.0.1")), Some("oif1"));
        assert_eq!(table.lookup_lpm(ip("10.1.1.1")).unwrap().mask, 8);
        assert_eq!(table.lookup_lpm(ip("172.16.0.1")).unwrap().mask, 0);
    }

    #[test]
    fn direct_routes_have_no_gateway() {
        let table = RoutingTable::new();
        table.add_direct(ip("10.0.0.0"), 24);
        let route = table.lookup_lpm(ip("10.0.0.5")).unwrap();
        assert!(route.is_direct());
        assert_eq!(route.oif, None);
    }
}

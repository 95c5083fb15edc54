/*!

A user-space simulator of a multi-node TCP/IP data plane.

A topology of logical nodes (hosts, routers, L2 switches) is connected by
links terminated by interfaces.  Each node lives in this process but owns
a private datagram endpoint on the loopback transport; sending a frame out
of an interface delivers bytes to the peer interface's node via that
endpoint.  Above this physical-emulation floor, every node runs a
miniature stack:

* L2 framing with 802.1Q VLAN tagging,
* MAC learning and flooding for switches,
* ARP resolution for hosts and routers,
* longest-prefix-match IPv4 forwarding with TTL handling,
* and a trivial echo ("ping") path on top.

The ingress journey of every frame is:

```text
endpoint recv -> node demux -> interface -> L2 ingress qualifier
    -> (drop | ARP engine | learning-bridge forward | promote to L3)
```

and the egress journey runs the same stations in reverse, with an ARP
resolution of the next hop in the middle.  Build a [`Graph`], wire it up,
call [`Graph::start_receiver`], and drive it through the [`api`] module.

None of the emulated wire formats interoperate with real Ethernet: each
datagram carries the recipient interface name as out-of-band routing
metadata, and the FCS field is never computed or checked.

*/

pub mod api;
pub mod frame;

mod addr;
mod arp;
mod error;
mod l2;
mod l3;
mod phys;
mod tables;
mod topology;

pub use crate::addr::*;
pub use crate::error::*;
pub use crate::tables::*;
pub use crate::topology::*;

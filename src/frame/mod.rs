/*! Byte-exact codecs for the simulated wire formats.

Everything multi-byte is wire order (network big-endian); nothing here
relies on native struct layout.  The codecs are deliberately lenient about
fields the engine never uses (the FCS trailer exists but is never computed
or checked).
*/

mod arp;
mod buffer;
mod ethernet;
mod ipv4;

pub use self::arp::*;
pub use self::buffer::*;
pub use self::ethernet::*;
pub use self::ipv4::*;

use thiserror::Error;

/// EtherType for IPv4 payloads.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType for ARP messages.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// Tag Protocol Identifier marking an 802.1Q shim.
pub const TPID_8021Q: u16 = 0x8100;

/// IP protocol number for ICMP (the ping path).
pub const IPPROTO_ICMP: u8 = 1;

/// A buffer couldn't be decoded, or an in-place edit couldn't fit.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("not enough bytes")]
    Truncated,
    #[error("no headroom for a VLAN tag")]
    NoHeadroom,
    #[error("IPv4 options are not supported")]
    Ipv4Options,
}

macro_rules! ensure_remaining {
    ($buf:expr, $len:expr) => {
        if bytes::Buf::remaining(&$buf) < $len {
            return Err(crate::frame::CodecError::Truncated);
        }
    };
}
pub(crate) use ensure_remaining;

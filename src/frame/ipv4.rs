use crate::addr::Ipv4Address;
use crate::frame::{ensure_remaining, CodecError};
use bytes::{Buf, BufMut};

/// IPv4 header length; the simulator never emits options (IHL is always 5).
pub const IPV4_HDR_LEN: usize = 20;

/// Initial TTL on originated packets.
pub const IPV4_DEFAULT_TTL: u8 = 64;

const IPV4_VERSION_IHL: u8 = 0x45;
const TTL_OFFSET: usize = 8;

/// An IPv4 header.
///
/// Identification, flags/fragment-offset and checksum are carried but
/// unused: the simulator neither fragments nor checksums.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ipv4Hdr {
    pub tos: u8,
    pub total_len: u16,
    pub ident: u16,
    pub flags_frag: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
}

impl Ipv4Hdr {
    /// A fresh header for an originated packet carrying `payload_len`
    /// bytes: TTL 64, nothing fragmented, checksum zero.
    pub fn originate(src: Ipv4Address, dst: Ipv4Address, protocol: u8, payload_len: usize) -> Ipv4Hdr {
        Ipv4Hdr {
            tos: 0,
            total_len: (IPV4_HDR_LEN + payload_len) as u16,
            ident: 0,
            flags_frag: 0,
            ttl: IPV4_DEFAULT_TTL,
            protocol,
            checksum: 0,
            src,
            dst,
        }
    }

    pub fn parse(packet: &[u8]) -> Result<Ipv4Hdr, CodecError> {
        let mut buf = packet;
        ensure_remaining!(buf, IPV4_HDR_LEN);
        let version_ihl = buf.get_u8();
        if version_ihl != IPV4_VERSION_IHL {
            return Err(CodecError::Ipv4Options);
        }
        Ok(Ipv4Hdr {
            tos: buf.get_u8(),
            total_len: buf.get_u16(),
            ident: buf.get_u16(),
            flags_frag: buf.get_u16(),
            ttl: buf.get_u8(),
            protocol: buf.get_u8(),
            checksum: buf.get_u16(),
            src: Ipv4Address::new(buf.get_u32()),
            dst: Ipv4Address::new(buf.get_u32()),
        })
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u8(IPV4_VERSION_IHL);
        out.put_u8(self.tos);
        out.put_u16(self.total_len);
        out.put_u16(self.ident);
        out.put_u16(self.flags_frag);
        out.put_u8(self.ttl);
        out.put_u8(self.protocol);
        out.put_u16(self.checksum);
        out.put_u32(self.src.to_u32());
        out.put_u32(self.dst.to_u32());
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IPV4_HDR_LEN);
        self.encode(&mut out);
        out
    }
}

/// Rewrites the TTL field of an encoded packet in place.
pub fn set_ttl(packet: &mut [u8], ttl: u8) -> Result<(), CodecError> {
    if packet.len() < IPV4_HDR_LEN {
        return Err(CodecError::Truncated);
    }
    packet[TTL_OFFSET] = ttl;
    Ok(())
}

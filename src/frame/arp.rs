use crate::addr::{Ipv4Address, MacAddress};
use crate::frame::{ensure_remaining, CodecError, ETHERTYPE_IPV4};
use bytes::{Buf, BufMut};

/// ARP operation code for a broadcast request.
pub const ARP_OP_REQUEST: u16 = 1;
/// ARP operation code for a reply.
pub const ARP_OP_REPLY: u16 = 2;

/// Wire size of an ARP message for Ethernet/IPv4.
pub const ARP_WIRE_LEN: usize = 28;

const ARP_HW_ETHERNET: u16 = 1;
const ARP_HW_ADDR_LEN: u8 = 6;
const ARP_PROTO_ADDR_LEN: u8 = 4;

/// An ARP message as carried in an Ethernet payload (ethertype 0x0806).
///
/// The hardware/protocol type and length fields are fixed for this
/// simulator (Ethernet carrying IPv4) and are regenerated on encode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArpPacket {
    pub op: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Address,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Address,
}

impl ArpPacket {
    pub fn parse(payload: &[u8]) -> Result<ArpPacket, CodecError> {
        let mut buf = payload;
        ensure_remaining!(buf, ARP_WIRE_LEN);
        let _hw_type = buf.get_u16();
        let _proto_type = buf.get_u16();
        let _hw_addr_len = buf.get_u8();
        let _proto_addr_len = buf.get_u8();
        let op = buf.get_u16();
        let sender_mac = read_mac(&mut buf);
        let sender_ip = Ipv4Address::new(buf.get_u32());
        let target_mac = read_mac(&mut buf);
        let target_ip = Ipv4Address::new(buf.get_u32());
        Ok(ArpPacket {
            op,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u16(ARP_HW_ETHERNET);
        out.put_u16(ETHERTYPE_IPV4);
        out.put_u8(ARP_HW_ADDR_LEN);
        out.put_u8(ARP_PROTO_ADDR_LEN);
        out.put_u16(self.op);
        out.put_slice(&self.sender_mac.octets());
        out.put_u32(self.sender_ip.to_u32());
        out.put_slice(&self.target_mac.octets());
        out.put_u32(self.target_ip.to_u32());
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ARP_WIRE_LEN);
        self.encode(&mut out);
        out
    }
}

fn read_mac(buf: &mut &[u8]) -> MacAddress {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    MacAddress::from_octets(octets)
}

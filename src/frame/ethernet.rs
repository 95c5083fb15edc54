use crate::addr::MacAddress;
use crate::frame::{ensure_remaining, CodecError, FrameBuf, TPID_8021Q};
use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut};

/// Ethernet II header length excluding payload and FCS.
pub const ETH_HDR_LEN: usize = 14;
/// Same, with the 4-byte 802.1Q shim present.
pub const VLAN_ETH_HDR_LEN: usize = 18;
/// Length of the (never computed) FCS trailer.
pub const FCS_LEN: usize = 4;

/// The 802.1Q shim, minus the TPID.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VlanTag {
    pub pcp: u8,
    pub dei: bool,
    pub vid: u16,
}

impl VlanTag {
    pub(crate) fn from_tci(tci: u16) -> VlanTag {
        VlanTag {
            pcp: (tci >> 13) as u8,
            dei: tci & 0x1000 != 0,
            vid: tci & 0x0FFF,
        }
    }

    pub(crate) fn to_tci(self) -> u16 {
        (u16::from(self.pcp) << 13) | (u16::from(self.dei) << 12) | (self.vid & 0x0FFF)
    }
}

/// A decoded Ethernet II header, 802.1Q aware.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EthernetHdr {
    pub dst_mac: MacAddress,
    pub src_mac: MacAddress,
    pub vlan: Option<VlanTag>,
    pub ethertype: u16,
}

impl EthernetHdr {
    /// Decodes the header at the front of `frame`.
    ///
    /// A frame is VLAN-tagged iff the two bytes at offset 12 hold 0x8100.
    pub fn parse(frame: &[u8]) -> Result<EthernetHdr, CodecError> {
        let mut buf = frame;
        ensure_remaining!(buf, ETH_HDR_LEN);
        let dst_mac = read_mac(&mut buf);
        let src_mac = read_mac(&mut buf);
        let tpid_or_type = buf.get_u16();
        if tpid_or_type != TPID_8021Q {
            return Ok(EthernetHdr {
                dst_mac,
                src_mac,
                vlan: None,
                ethertype: tpid_or_type,
            });
        }
        ensure_remaining!(buf, VLAN_ETH_HDR_LEN - ETH_HDR_LEN);
        let tci = buf.get_u16();
        let ethertype = buf.get_u16();
        Ok(EthernetHdr {
            dst_mac,
            src_mac,
            vlan: Some(VlanTag::from_tci(tci)),
            ethertype,
        })
    }

    /// Header length on the wire: 14, or 18 with the shim.
    pub fn wire_len(&self) -> usize {
        if self.vlan.is_some() {
            VLAN_ETH_HDR_LEN
        } else {
            ETH_HDR_LEN
        }
    }
}

fn read_mac(buf: &mut &[u8]) -> MacAddress {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    MacAddress::from_octets(octets)
}

/// Whether the bytes at offset 12 announce an 802.1Q shim.
pub fn is_vlan_tagged(frame: &[u8]) -> bool {
    frame.len() >= ETH_HDR_LEN && BigEndian::read_u16(&frame[12..14]) == TPID_8021Q
}

/// The shim of a tagged frame, if any.
pub fn vlan_tag(frame: &[u8]) -> Option<VlanTag> {
    if !is_vlan_tagged(frame) || frame.len() < 16 {
        return None;
    }
    Some(VlanTag::from_tci(BigEndian::read_u16(&frame[14..16])))
}

/// Header size excluding payload: 14 untagged, 18 tagged.
pub fn header_len(frame: &[u8]) -> usize {
    if is_vlan_tagged(frame) {
        VLAN_ETH_HDR_LEN
    } else {
        ETH_HDR_LEN
    }
}

/// The payload between the header and the FCS trailer.
pub fn payload(frame: &[u8]) -> Result<&[u8], CodecError> {
    let hdr = header_len(frame);
    if frame.len() < hdr + FCS_LEN {
        return Err(CodecError::Truncated);
    }
    Ok(&frame[hdr..frame.len() - FCS_LEN])
}

/// Mutable view of the payload, for in-place edits (TTL rewrite).
pub fn payload_mut(frame: &mut [u8]) -> Result<&mut [u8], CodecError> {
    let hdr = header_len(frame);
    if frame.len() < hdr + FCS_LEN {
        return Err(CodecError::Truncated);
    }
    let end = frame.len() - FCS_LEN;
    Ok(&mut frame[hdr..end])
}

/// Tags `frame` with `vid`.
///
/// An already-tagged frame has its VID overwritten in place (PCP and DEI
/// are preserved); an untagged frame has its dst/src MACs shifted into the
/// headroom and the shim written behind them.  The payload is untouched.
pub fn tag_with_vlan(frame: &mut FrameBuf, vid: u16) -> Result<(), CodecError> {
    if frame.len() < ETH_HDR_LEN {
        return Err(CodecError::Truncated);
    }
    if is_vlan_tagged(frame.bytes()) {
        let bytes = frame.bytes_mut();
        let tci = BigEndian::read_u16(&bytes[14..16]);
        BigEndian::write_u16(&mut bytes[14..16], (tci & 0xF000) | (vid & 0x0FFF));
        return Ok(());
    }
    let shim = VlanTag {
        pcp: 0,
        dei: false,
        vid,
    };
    let bytes = frame.grow_front(4)?;
    // dst_mac + src_mac move left over the headroom
    bytes.copy_within(4..16, 0);
    BigEndian::write_u16(&mut bytes[12..14], TPID_8021Q);
    BigEndian::write_u16(&mut bytes[14..16], shim.to_tci());
    Ok(())
}

/// Removes the 802.1Q shim; a no-op on untagged frames.
pub fn untag(frame: &mut FrameBuf) -> Result<(), CodecError> {
    if !is_vlan_tagged(frame.bytes()) {
        return Ok(());
    }
    if frame.len() < VLAN_ETH_HDR_LEN {
        return Err(CodecError::Truncated);
    }
    // dst_mac + src_mac move right over the shim
    frame.bytes_mut().copy_within(0..12, 4);
    frame.shrink_front(4);
    Ok(())
}

/// Builds an untagged frame around `payload`, FCS zeroed, placed so that
/// later tagging has headroom.
pub fn build_frame(
    dst_mac: MacAddress,
    src_mac: MacAddress,
    ethertype: u16,
    payload: &[u8],
) -> FrameBuf {
    let mut body = Vec::with_capacity(ETH_HDR_LEN + payload.len() + FCS_LEN);
    body.put_slice(&dst_mac.octets());
    body.put_slice(&src_mac.octets());
    body.put_u16(ethertype);
    body.put_slice(payload);
    body.put_u32(0); // FCS, never computed
    FrameBuf::from_frame(&body)
}

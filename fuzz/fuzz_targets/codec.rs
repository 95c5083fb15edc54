#![no_main]
use libfuzzer_sys::fuzz_target;
use simstack::frame::{self, ArpPacket, EthernetHdr, FrameBuf, Ipv4Hdr, MAX_FRAME_BUFFER};

fuzz_target!(|data: &[u8]| {
    let _ = EthernetHdr::parse(data);
    let _ = ArpPacket::parse(data);
    let _ = Ipv4Hdr::parse(data);
    if data.len() <= MAX_FRAME_BUFFER {
        let mut buf = FrameBuf::from_frame(data);
        let _ = frame::tag_with_vlan(&mut buf, 10);
        let _ = frame::untag(&mut buf);
    }
});

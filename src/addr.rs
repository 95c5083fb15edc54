/*! IPv4 and MAC address value types */

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An IPv4 address held as a host-order 32-bit integer.
///
/// The textual form is dotted decimal.  Equality and hashing go through the
/// numeric form, so `"10.0.0.1".parse()` and `Ipv4Address::new(0x0A000001)`
/// compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ipv4Address(u32);

impl Ipv4Address {
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address(0);

    pub fn new(addr: u32) -> Ipv4Address {
        Ipv4Address(addr)
    }

    pub fn from_octets(octets: [u8; 4]) -> Ipv4Address {
        Ipv4Address(u32::from_be_bytes(octets))
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }

    pub fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Clears the low `32 - mask_bits` bits, leaving the subnet prefix.
    ///
    /// `mask_bits` beyond 32 is treated as 32.
    pub fn apply_mask(self, mask_bits: u8) -> Ipv4Address {
        if mask_bits == 0 {
            return Ipv4Address(0);
        }
        let bits = u32::from(mask_bits.min(32));
        Ipv4Address(self.0 & (!0u32 << (32 - bits)))
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl fmt::Debug for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A string wasn't a dotted-decimal IPv4 address.
#[derive(Debug, Error)]
#[error("not a dotted-decimal IPv4 address: {0:?}")]
pub struct AddrParseError(pub String);

impl FromStr for Ipv4Address {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Ipv4Address, AddrParseError> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| AddrParseError(s.to_string()))?;
            *octet = part
                .parse::<u8>()
                .map_err(|_| AddrParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError(s.to_string()));
        }
        Ok(Ipv4Address::from_octets(octets))
    }
}

/// A 48-bit MAC address.
///
/// The textual form is six colon-separated uppercase hex bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// FF:FF:FF:FF:FF:FF
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);
    /// 00:00:00:00:00:00
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub fn from_octets(octets: [u8; 6]) -> MacAddress {
        MacAddress(octets)
    }

    /// Builds a MAC from the low 48 bits of `val`.
    pub fn from_u64(val: u64) -> MacAddress {
        let bytes = val.to_be_bytes();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[2..]);
        MacAddress(octets)
    }

    pub fn octets(self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == MacAddress::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_textual_roundtrip() {
        let ip: Ipv4Address = "10.1.2.7".parse().unwrap();
        assert_eq!(ip.to_u32(), 0x0A010207);
        assert_eq!(ip.to_string(), "10.1.2.7");
        assert!("10.1.2".parse::<Ipv4Address>().is_err());
        assert!("10.1.2.300".parse::<Ipv4Address>().is_err());
        assert!("10.1.2.7.8".parse::<Ipv4Address>().is_err());
    }

    #[test]
    fn apply_mask_clears_host_bits() {
        let ip: Ipv4Address = "10.1.2.7".parse().unwrap();
        assert_eq!(ip.apply_mask(24).to_string(), "10.1.2.0");
        assert_eq!(ip.apply_mask(16).to_string(), "10.1.0.0");
        assert_eq!(ip.apply_mask(32), ip);
        assert_eq!(ip.apply_mask(0).to_u32(), 0);
    }

    #[test]
    fn mac_display_is_uppercase_hex() {
        let mac = MacAddress::from_octets([0x0A, 0xFF, 0x00, 0x12, 0x34, 0xAB]);
        assert_eq!(mac.to_string(), "0A:FF:00:12:34:AB");
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert_eq!(MacAddress::from_u64(0xFFFF_FFFF_FFFF), MacAddress::BROADCAST);
    }
}

use crate::addr::{AddrParseError, Ipv4Address};
use std::io;
use std::result;
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced to operator-facing entry points.
///
/// Data-plane drops (qualifier rejects, VLAN mismatches, TTL expiry) are
/// not errors; they are logged at the drop site and the packet is gone.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no node named {0}")]
    NoSuchNode(String),
    #[error("no interface named {0}")]
    NoSuchInterface(String),
    #[error("no vacant interface slot on node {0}")]
    NoVacantSlot(String),
    #[error("interface {0} is not attached to a link")]
    NotLinked(String),
    #[error("interface {0} has no IP address")]
    NotL3Mode(String),
    #[error("no eligible subnet for {0}")]
    NoEligibleSubnet(Ipv4Address),
    #[error("cannot route {0}")]
    CannotRoute(Ipv4Address),
    #[error("{0}")]
    Addr(#[from] AddrParseError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

use std::{
    borrow::Cow,
    fmt::{Display, Formatter},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use ipnet::IpNet;
use thiserror::Error;

pub mod multi;
pub mod range;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Address {} is out of range!", .0)]
    OutOfRange(IpAddr),
    #[error("Address {} is reserved!", .0)]
    Reserved(IpAddr),
    #[error("Address {} is already allocated!", .0)]
    AlreadyAllocated(IpAddr),
    #[error("Address {} is not allocated!", .0)]
    NotAllocated(IpAddr),
    #[error("The address range was exhausted!")]
    Exhausted,
    #[error("Address {} doesn't belong to any range!", .0)]
    NotInPool(IpAddr),
    #[error("Invalid address range! Details: {}", .0)]
    Invalid(Cow<'static, str>),
}

/// A contiguous block of addresses, either a whole CIDR or inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRange {
    Cidr(IpNet),
    Bounds { start: IpAddr, end: IpAddr },
}

impl Display for IpRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IpRange::Cidr(cidr) => f.write_fmt(format_args!("{cidr}")),
            IpRange::Bounds { start, end } => f.write_fmt(format_args!("{start}-{end}")),
        }
    }
}

impl From<IpNet> for IpRange {
    fn from(value: IpNet) -> Self {
        IpRange::Cidr(value)
    }
}

pub(crate) fn same_family(first: &IpAddr, second: &IpAddr) -> bool {
    first.is_ipv4() == second.is_ipv4()
}

pub(crate) fn successor(ip: IpAddr) -> Option<IpAddr> {
    match ip {
        IpAddr::V4(ip) => u32::from(ip)
            .checked_add(1)
            .map(|next| IpAddr::V4(Ipv4Addr::from(next))),
        IpAddr::V6(ip) => u128::from(ip)
            .checked_add(1)
            .map(|next| IpAddr::V6(Ipv6Addr::from(next))),
    }
}

/// Number of addresses between `first` and `last`, both inclusive.
/// Saturates for the full IPv6 space.
pub(crate) fn span(first: &IpAddr, last: &IpAddr) -> u128 {
    to_bits(last)
        .saturating_sub(to_bits(first))
        .saturating_add(1)
}

fn to_bits(ip: &IpAddr) -> u128 {
    match ip {
        IpAddr::V4(ip) => u32::from(*ip).into(),
        IpAddr::V6(ip) => u128::from(*ip),
    }
}

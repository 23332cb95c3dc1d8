use std::{collections::BTreeSet, net::IpAddr};

use ipnet::IpNet;
use log::trace;

use super::{same_family, span, successor, IpRange, RangeError};

/// Allocation state of a single contiguous address block.
#[derive(Debug, Clone)]
pub struct RangeAllocator {
    range: IpRange,
    first: IpAddr,
    last: IpAddr,
    /// a _sorted_ list of addresses that are never handed out
    reserved: Vec<IpAddr>,
    allocated: BTreeSet<IpAddr>,
}

impl RangeAllocator {
    /// Creates an allocator covering every address of `cidr` except the network address.
    pub fn from_cidr(
        cidr: IpNet,
        reserved: impl IntoIterator<Item = IpAddr>,
    ) -> Result<Self, RangeError> {
        let cidr = cidr.trunc();
        let last = cidr.broadcast();
        let first = successor(cidr.network())
            .filter(|first| *first <= last)
            .ok_or_else(|| RangeError::Invalid(format!("{cidr} has no host addresses").into()))?;

        Ok(Self::new(IpRange::Cidr(cidr), first, last, reserved))
    }

    /// Creates an allocator covering `start..=end`.
    pub fn from_bounds(start: IpAddr, end: IpAddr) -> Result<Self, RangeError> {
        if !same_family(&start, &end) {
            return Err(RangeError::Invalid(
                format!("{start} and {end} belong to different address families").into(),
            ));
        }

        if start > end {
            return Err(RangeError::Invalid(
                format!("range start {start} is past its end {end}").into(),
            ));
        }

        Ok(Self::new(
            IpRange::Bounds { start, end },
            start,
            end,
            std::iter::empty(),
        ))
    }

    fn new(
        range: IpRange,
        first: IpAddr,
        last: IpAddr,
        reserved: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        let mut reserved = reserved
            .into_iter()
            .filter(|ip| same_family(ip, &first) && first <= *ip && *ip <= last)
            .collect::<Vec<_>>();

        reserved.sort_unstable();
        reserved.dedup();

        Self {
            range,
            first,
            last,
            reserved,
            allocated: BTreeSet::new(),
        }
    }

    pub fn range(&self) -> &IpRange {
        &self.range
    }

    /// Whether `ip` could ever be handed out by this range.
    pub fn has(&self, ip: &IpAddr) -> bool {
        self.in_bounds(ip) && !self.is_reserved(ip)
    }

    pub fn is_allocated(&self, ip: &IpAddr) -> bool {
        self.allocated.contains(ip)
    }

    pub fn allocate_ip(&mut self, ip: IpAddr) -> Result<(), RangeError> {
        if !self.in_bounds(&ip) {
            return Err(RangeError::OutOfRange(ip));
        }

        if self.is_reserved(&ip) {
            return Err(RangeError::Reserved(ip));
        }

        if !self.allocated.insert(ip) {
            return Err(RangeError::AlreadyAllocated(ip));
        }

        trace!("Marked {ip} as used in {}", self.range);

        Ok(())
    }

    /// Allocates the lowest free address of the range.
    pub fn allocate_next(&mut self) -> Result<IpAddr, RangeError> {
        let ip = self.next_free().ok_or(RangeError::Exhausted)?;

        self.allocated.insert(ip);

        Ok(ip)
    }

    pub fn release(&mut self, ip: &IpAddr) -> Result<(), RangeError> {
        if !self.allocated.remove(ip) {
            return Err(RangeError::NotAllocated(*ip));
        }

        Ok(())
    }

    /// Number of addresses that can be handed out, reserved ones excluded.
    pub fn size(&self) -> u128 {
        span(&self.first, &self.last).saturating_sub(self.reserved.len() as u128)
    }

    pub fn used(&self) -> usize {
        self.allocated.len()
    }

    fn in_bounds(&self, ip: &IpAddr) -> bool {
        same_family(ip, &self.first) && self.first <= *ip && *ip <= self.last
    }

    fn is_reserved(&self, ip: &IpAddr) -> bool {
        self.reserved.binary_search(ip).is_ok()
    }

    fn next_free(&self) -> Option<IpAddr> {
        let mut candidate = Some(self.first);

        // walks the range linearly, fine for the pool sizes we care about,
        // if it ever shows up in a profile it can jump over allocated runs instead
        while let Some(ip) = candidate {
            if !self.is_reserved(&ip) && !self.allocated.contains(&ip) {
                return Some(ip);
            }

            candidate = match ip == self.last {
                true => None,
                false => successor(ip),
            };
        }

        None
    }
}

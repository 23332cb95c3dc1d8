use std::{net::IpAddr, ops::Deref};

use super::{range::RangeAllocator, RangeError};

/// Ranges of a single pool, kept in declaration order.
#[derive(Debug, Clone, Default)]
pub struct MultiRangeAllocator(Vec<RangeAllocator>);

impl MultiRangeAllocator {
    pub fn new(ranges: Vec<RangeAllocator>) -> Self {
        Self(ranges)
    }

    /// Marks `ip` as used in the first range that can hold it and returns that range's index.
    pub fn allocate_ip(&mut self, ip: IpAddr) -> Result<usize, RangeError> {
        let (index, range) = self
            .0
            .iter_mut()
            .enumerate()
            .find(|(_, range)| range.has(&ip))
            .ok_or(RangeError::NotInPool(ip))?;

        range.allocate_ip(ip)?;

        Ok(index)
    }

    /// Takes the lowest free address of the first range that isn't exhausted.
    pub fn allocate_next(&mut self) -> Result<(IpAddr, usize), RangeError> {
        for (index, range) in self.0.iter_mut().enumerate() {
            match range.allocate_next() {
                Ok(ip) => return Ok((ip, index)),
                Err(RangeError::Exhausted) => continue,
                Err(error) => return Err(error),
            }
        }

        Err(RangeError::Exhausted)
    }

    pub fn release(&mut self, ip: &IpAddr) -> Result<usize, RangeError> {
        let (index, range) = self
            .0
            .iter_mut()
            .enumerate()
            .find(|(_, range)| range.is_allocated(ip))
            .ok_or(RangeError::NotAllocated(*ip))?;

        range.release(ip)?;

        Ok(index)
    }

    pub fn size(&self) -> u128 {
        self.0
            .iter()
            .fold(0u128, |total, range| total.saturating_add(range.size()))
    }

    pub fn used(&self) -> usize {
        self.0.iter().map(RangeAllocator::used).sum()
    }
}

impl Deref for MultiRangeAllocator {
    type Target = Vec<RangeAllocator>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<RangeAllocator> for MultiRangeAllocator {
    fn from_iter<T: IntoIterator<Item = RangeAllocator>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::MultiRangeAllocator;
    use crate::ip::{range::RangeAllocator, RangeError};

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    fn two_small_ranges() -> MultiRangeAllocator {
        MultiRangeAllocator::new(vec![
            RangeAllocator::from_cidr("10.0.0.0/30".parse().unwrap(), [ip("10.0.0.1"), ip("10.0.0.3")])
                .unwrap(),
            RangeAllocator::from_bounds(ip("10.0.1.5"), ip("10.0.1.6")).unwrap(),
        ])
    }

    #[test]
    fn allocate_next_exhausts_ranges_in_declaration_order() {
        let mut allocators = two_small_ranges();

        assert_eq!(allocators.allocate_next(), Ok((ip("10.0.0.2"), 0)));
        assert_eq!(allocators.allocate_next(), Ok((ip("10.0.1.5"), 1)));
        assert_eq!(allocators.allocate_next(), Ok((ip("10.0.1.6"), 1)));
        assert_eq!(allocators.allocate_next(), Err(RangeError::Exhausted));
        assert_eq!(allocators.used(), 3);
        assert_eq!(allocators.size(), 3);
    }

    #[test]
    fn allocate_ip_delegates_to_the_owning_range() {
        let mut allocators = two_small_ranges();

        assert_eq!(allocators.allocate_ip(ip("10.0.1.6")), Ok(1));
        assert_eq!(
            allocators.allocate_ip(ip("10.0.1.6")),
            Err(RangeError::AlreadyAllocated(ip("10.0.1.6")))
        );
        assert_eq!(allocators.allocate_ip(ip("10.0.1.7")), Err(RangeError::NotInPool(ip("10.0.1.7"))));
        assert_eq!(allocators.allocate_ip(ip("10.0.0.1")), Err(RangeError::NotInPool(ip("10.0.0.1"))));
    }

    #[test]
    fn release_finds_the_range_holding_the_address() {
        let mut allocators = two_small_ranges();

        allocators.allocate_ip(ip("10.0.1.5")).unwrap();

        assert_eq!(allocators.release(&ip("10.0.1.5")), Ok(1));
        assert_eq!(
            allocators.release(&ip("10.0.1.5")),
            Err(RangeError::NotAllocated(ip("10.0.1.5")))
        );
        assert_eq!(allocators.allocate_next(), Ok((ip("10.0.0.2"), 0)));
    }

    #[test]
    fn overlapping_ranges_prefer_the_first_declared() {
        let mut allocators = MultiRangeAllocator::new(vec![
            RangeAllocator::from_bounds(ip("10.0.0.10"), ip("10.0.0.20")).unwrap(),
            RangeAllocator::from_bounds(ip("10.0.0.15"), ip("10.0.0.30")).unwrap(),
        ]);

        assert_eq!(allocators.allocate_ip(ip("10.0.0.16")), Ok(0));
        assert_eq!(allocators.allocate_ip(ip("10.0.0.25")), Ok(1));
    }
}

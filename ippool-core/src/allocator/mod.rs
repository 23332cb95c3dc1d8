//! Allocation of addresses out of a single persisted pool.
//!
//! Nothing is cached between calls. Every operation reads the pool, replays its status into a
//! fresh [`MultiRangeAllocator`], applies its change and writes the whole status back,
//! conditioned on the version it has read. A stale write is rejected by the store and the
//! operation starts over, up to the configured number of attempts.

use std::{fmt::Display, future::Future, net::IpAddr, time::Duration};

use derive_builder::Builder;
use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::{
    ip::{multi::MultiRangeAllocator, range::RangeAllocator, IpRange, RangeError},
    resources::crd::v1alpha2::ippool::{
        IPAddressOwner, IPAddressPhase, IPAddressState, IPPoolSpec, IPPoolStatus, IPPoolUsage,
        SubnetIPRange, SubnetInfo,
    },
    store::{PoolSnapshot, PoolStore, StoreError},
};

pub use self::{error::PoolAllocatorError, owner::OwnerSelector, retry::RetryPolicy};

pub mod error;
pub mod owner;
pub mod retry;

#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct PoolAllocatorOptions {
    pub retry: RetryPolicy,
    /// upper bound for a whole operation, retries included, `None` waits indefinitely
    pub operation_timeout: Option<Duration>,
}

impl Default for PoolAllocatorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

pub struct PoolAllocator<S> {
    pool: String,
    store: S,
    options: PoolAllocatorOptions,
}

impl<S: PoolStore> PoolAllocator<S> {
    /// Creates an allocator for an existing pool with well formed ranges.
    ///
    /// Fails with [`PoolAllocatorError::PoolNotFound`] when the pool isn't there, so that callers
    /// can fall back to other address management.
    pub async fn new(
        pool: impl Into<String>,
        store: S,
        options: PoolAllocatorOptions,
    ) -> Result<Self, PoolAllocatorError> {
        let allocator = Self::unchecked(pool, store, options);
        let deadline = allocator.deadline();
        let snapshot = allocator.read(deadline).await?;

        build_ranges(&allocator.pool, &snapshot.spec)?;

        Ok(allocator)
    }

    /// Creates an allocator without checking whether the pool exists.
    pub fn unchecked(pool: impl Into<String>, store: S, options: PoolAllocatorOptions) -> Self {
        Self {
            pool: pool.into(),
            store,
            options,
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Claims a specific address, returns the subnet of the range it belongs to.
    pub async fn allocate_ip(
        &self,
        ip: IpAddr,
        phase: IPAddressPhase,
        owner: IPAddressOwner,
    ) -> Result<SubnetInfo, PoolAllocatorError> {
        let result = self
            .transact(|state| {
                let index = state
                    .allocators
                    .allocate_ip(ip)
                    .map_err(|error| PoolAllocatorError::from_range(&self.pool, error))?;

                state.records.push(IPAddressState {
                    ip_address: ip,
                    phase,
                    owner: owner.clone(),
                });

                Ok(Mutation::Commit(state.subnets[index].clone()))
            })
            .await;

        if result.is_ok() {
            info!("Allocated {ip} ({phase}) to {owner} in pool '{}'!", self.pool);
        }

        self.report(format_args!("allocate {ip} to {owner}"), result)
    }

    /// Claims the lowest free address, searching ranges in declaration order.
    ///
    /// An owner can hold a single address per pool, asking again fails without touching the pool.
    pub async fn allocate_next(
        &self,
        phase: IPAddressPhase,
        owner: IPAddressOwner,
    ) -> Result<(IpAddr, SubnetInfo), PoolAllocatorError> {
        let identity = OwnerSelector::from(&owner);
        let result = self.allocate_next_for(&identity, phase, &owner).await;

        if let Ok((ip, _)) = &result {
            info!("Allocated {ip} ({phase}) to {owner} in pool '{}'!", self.pool);
        }

        self.report(format_args!("allocate an address to {owner}"), result)
    }

    async fn allocate_next_for(
        &self,
        identity: &OwnerSelector,
        phase: IPAddressPhase,
        owner: &IPAddressOwner,
    ) -> Result<(IpAddr, SubnetInfo), PoolAllocatorError> {
        if self.lookup(identity).await?.is_some() {
            return Err(self.owner_already_allocated(owner));
        }

        self.transact(|state| {
            // the owner could've been given an address since the check above
            if state.find(identity).is_some() {
                return Err(self.owner_already_allocated(owner));
            }

            let (ip, index) = state
                .allocators
                .allocate_next()
                .map_err(|error| PoolAllocatorError::from_range(&self.pool, error))?;

            state.records.push(IPAddressState {
                ip_address: ip,
                phase,
                owner: owner.clone(),
            });

            Ok(Mutation::Commit((ip, state.subnets[index].clone())))
        })
        .await
    }

    pub async fn release(&self, ip: IpAddr) -> Result<(), PoolAllocatorError> {
        let result = self
            .transact(|state| {
                state
                    .allocators
                    .release(&ip)
                    .map_err(|error| PoolAllocatorError::from_range(&self.pool, error))?;
                state.records.retain(|record| record.ip_address != ip);

                Ok(Mutation::Commit(()))
            })
            .await;

        if result.is_ok() {
            info!("Released {ip} in pool '{}'!", self.pool);
        }

        self.report(format_args!("release {ip}"), result)
    }

    /// Releases the first address held by a matching owner, fails if there's none.
    pub async fn release_by_owner(
        &self,
        selector: &OwnerSelector,
    ) -> Result<IpAddr, PoolAllocatorError> {
        let result = self
            .release_matching(selector)
            .await
            .and_then(|released| {
                released.ok_or_else(|| PoolAllocatorError::OwnerNotFound {
                    pool: self.pool.clone(),
                    owner: selector.to_string(),
                })
            });

        self.report(format_args!("release the address of {selector}"), result)
    }

    /// Releases the first address held by a matching owner, doing nothing if there's none.
    pub async fn release_if_present(
        &self,
        selector: &OwnerSelector,
    ) -> Result<Option<IpAddr>, PoolAllocatorError> {
        let result = self.release_matching(selector).await;

        if let Ok(None) = result {
            debug!("{selector} holds no address in pool '{}'", self.pool);
        }

        self.report(format_args!("release the address of {selector}"), result)
    }

    async fn release_matching(
        &self,
        selector: &OwnerSelector,
    ) -> Result<Option<IpAddr>, PoolAllocatorError> {
        let released = self
            .transact(|state| {
                let Some(index) = state.find(selector) else {
                    return Ok(Mutation::Unchanged(None));
                };

                let record = state.records.remove(index);

                state
                    .allocators
                    .release(&record.ip_address)
                    .map_err(|error| PoolAllocatorError::from_range(&self.pool, error))?;

                Ok(Mutation::Commit(Some(record)))
            })
            .await?;

        Ok(released.map(|record| {
            info!(
                "Released {} held by {} in pool '{}'!",
                record.ip_address, record.owner, self.pool
            );

            record.ip_address
        }))
    }

    /// Whether a matching owner holds an address, a single read without retries.
    pub async fn has_owner(&self, selector: &OwnerSelector) -> Result<bool, PoolAllocatorError> {
        let result = self.lookup(selector).await.map(|record| record.is_some());

        self.report(format_args!("look up {selector}"), result)
    }

    pub async fn usage(&self) -> Result<IPPoolUsage, PoolAllocatorError> {
        let result = self
            .observe()
            .await
            .map(|state| usage_of(&state.allocators));

        self.report("compute the usage", result)
    }

    /// Current status of the pool with a freshly computed usage summary.
    pub async fn status(&self) -> Result<IPPoolStatus, PoolAllocatorError> {
        let result = self.observe().await.map(PoolState::into_status);

        self.report("read the status", result)
    }

    async fn lookup(
        &self,
        selector: &OwnerSelector,
    ) -> Result<Option<IPAddressState>, PoolAllocatorError> {
        let state = self.observe().await?;

        Ok(state
            .find(selector)
            .map(|index| state.records[index].clone()))
    }

    async fn observe(&self) -> Result<PoolState, PoolAllocatorError> {
        let deadline = self.deadline();
        let snapshot = self.read(deadline).await?;

        PoolState::rebuild(&self.pool, snapshot)
    }

    /// Runs `mutate` against the latest state of the pool until its result is written
    /// without a conflict.
    ///
    /// `mutate` may be called once per attempt, each time with freshly rebuilt state.
    async fn transact<T, F>(&self, mut mutate: F) -> Result<T, PoolAllocatorError>
    where
        F: FnMut(&mut PoolState) -> Result<Mutation<T>, PoolAllocatorError>,
    {
        let deadline = self.deadline();
        let attempts = self.options.retry.attempts.max(1);
        let mut backoff = self.options.retry.backoff();
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.sleep(backoff.next_delay(), deadline).await?;
            }

            let snapshot = match self.within(deadline, self.store.get(&self.pool)).await? {
                Ok(snapshot) => snapshot,
                Err(error) if error.is_transient() => {
                    warn!(
                        "Couldn't read pool '{}' (attempt {attempt}/{attempts})! {error}",
                        self.pool
                    );
                    last_error = Some(error);
                    continue;
                }
                Err(error) => return Err(self.store_error(error)),
            };

            let version = snapshot.version.clone();
            let mut state = PoolState::rebuild(&self.pool, snapshot)?;
            let value = match mutate(&mut state)? {
                Mutation::Commit(value) => value,
                Mutation::Unchanged(value) => return Ok(value),
            };
            let status = state.into_status();

            match self
                .within(
                    deadline,
                    self.store.update_status(&self.pool, &status, &version),
                )
                .await?
            {
                Ok(new_version) => {
                    debug!(
                        "Pool '{}' status written, version {version} -> {new_version}",
                        self.pool
                    );
                    return Ok(value);
                }
                Err(error) if error.is_conflict() => {
                    debug!(
                        "Pool '{}' changed since version {version} (attempt {attempt}/{attempts})",
                        self.pool
                    );
                    last_error = Some(error);
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        "Couldn't write pool '{}' status (attempt {attempt}/{attempts})! {error}",
                        self.pool
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(self.store_error(error)),
            }
        }

        Err(match last_error {
            Some(error) if !error.is_conflict() => PoolAllocatorError::StoreUnavailable {
                pool: self.pool.clone(),
                source: error,
            },
            _ => PoolAllocatorError::ConflictRetriesExhausted {
                pool: self.pool.clone(),
                attempts,
            },
        })
    }

    async fn read(&self, deadline: Option<Instant>) -> Result<PoolSnapshot, PoolAllocatorError> {
        self.within(deadline, self.store.get(&self.pool))
            .await?
            .map_err(|error| self.store_error(error))
    }

    fn deadline(&self) -> Option<Instant> {
        self.options
            .operation_timeout
            .map(|timeout| Instant::now() + timeout)
    }

    async fn within<F: Future>(
        &self,
        deadline: Option<Instant>,
        future: F,
    ) -> Result<F::Output, PoolAllocatorError> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, future)
                .await
                .map_err(|_| self.deadline_exceeded()),
            None => Ok(future.await),
        }
    }

    async fn sleep(
        &self,
        delay: Duration,
        deadline: Option<Instant>,
    ) -> Result<(), PoolAllocatorError> {
        if let Some(deadline) = deadline {
            if Instant::now() + delay >= deadline {
                return Err(self.deadline_exceeded());
            }
        }

        tokio::time::sleep(delay).await;

        Ok(())
    }

    fn report<T>(
        &self,
        operation: impl Display,
        result: Result<T, PoolAllocatorError>,
    ) -> Result<T, PoolAllocatorError> {
        if let Err(error) = &result {
            error!("Couldn't {operation} in pool '{}'! {error}", self.pool);
        }

        result
    }

    fn store_error(&self, error: StoreError) -> PoolAllocatorError {
        match error {
            StoreError::NotFound(_) => PoolAllocatorError::PoolNotFound {
                pool: self.pool.clone(),
            },
            error => PoolAllocatorError::StoreUnavailable {
                pool: self.pool.clone(),
                source: error,
            },
        }
    }

    fn deadline_exceeded(&self) -> PoolAllocatorError {
        PoolAllocatorError::DeadlineExceeded {
            pool: self.pool.clone(),
        }
    }

    fn owner_already_allocated(&self, owner: &IPAddressOwner) -> PoolAllocatorError {
        PoolAllocatorError::OwnerAlreadyHasAllocation {
            pool: self.pool.clone(),
            owner: owner.to_string(),
        }
    }
}

enum Mutation<T> {
    /// write the changed state back
    Commit(T),
    /// finish without writing
    Unchanged(T),
}

/// Pool rebuilt from a single snapshot.
struct PoolState {
    records: Vec<IPAddressState>,
    allocators: MultiRangeAllocator,
    /// subnet of every range, indexed like the allocators
    subnets: Vec<SubnetInfo>,
}

impl PoolState {
    fn rebuild(pool: &str, snapshot: PoolSnapshot) -> Result<Self, PoolAllocatorError> {
        let mut allocators = build_ranges(pool, &snapshot.spec)?;

        for record in &snapshot.status.ip_addresses {
            allocators.allocate_ip(record.ip_address).map_err(|source| {
                PoolAllocatorError::StateInconsistency {
                    pool: pool.to_owned(),
                    ip: record.ip_address,
                    source,
                }
            })?;
        }

        Ok(Self {
            records: snapshot.status.ip_addresses,
            allocators,
            subnets: snapshot
                .spec
                .ip_ranges
                .into_iter()
                .map(|range| range.subnet_info)
                .collect(),
        })
    }

    fn find(&self, selector: &OwnerSelector) -> Option<usize> {
        self.records
            .iter()
            .position(|record| selector.matches(&record.owner))
    }

    fn into_status(self) -> IPPoolStatus {
        IPPoolStatus {
            usage: Some(usage_of(&self.allocators)),
            ip_addresses: self.records,
        }
    }
}

fn build_ranges(pool: &str, spec: &IPPoolSpec) -> Result<MultiRangeAllocator, PoolAllocatorError> {
    spec.ip_ranges
        .iter()
        .map(range_allocator)
        .collect::<Result<MultiRangeAllocator, _>>()
        .map_err(|source| PoolAllocatorError::InvalidRange {
            pool: pool.to_owned(),
            source,
        })
}

fn range_allocator(range: &SubnetIPRange) -> Result<RangeAllocator, RangeError> {
    match range.range()? {
        IpRange::Cidr(cidr) => {
            let mut reserved = vec![range.subnet_info.gateway];

            // a carved out block doesn't own the broadcast address of its subnet
            if cidr.network().is_ipv4() && cidr.prefix_len() == range.subnet_info.prefix_length {
                reserved.push(cidr.broadcast());
            }

            RangeAllocator::from_cidr(cidr, reserved)
        }
        IpRange::Bounds { start, end } => RangeAllocator::from_bounds(start, end),
    }
}

fn usage_of(allocators: &MultiRangeAllocator) -> IPPoolUsage {
    IPPoolUsage {
        total: u64::try_from(allocators.size()).unwrap_or(u64::MAX),
        used: allocators.used() as u64,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::IpAddr,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use futures::future::join_all;

    use super::{
        OwnerSelector, PoolAllocator, PoolAllocatorError, PoolAllocatorOptions,
        PoolAllocatorOptionsBuilder, RetryPolicy,
    };
    use crate::{
        allocator::retry::RetryPolicyBuilder,
        resources::crd::v1alpha2::ippool::{
            IPAddressOwner, IPAddressPhase, IPAddressState, IPPoolSpec, IPPoolStatus,
            IPPoolUsage, PodOwner, SubnetIPRange, SubnetInfo,
        },
        store::{memory::InMemoryPoolStore, PoolSnapshot, PoolStore, StoreError},
    };

    const POOL: &str = "pool-a";

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    fn subnet(gateway: &str, prefix_length: u8) -> SubnetInfo {
        SubnetInfo {
            gateway: ip(gateway),
            prefix_length,
            vlan: None,
        }
    }

    fn cidr_range(cidr: &str, gateway: &str, prefix_length: u8) -> SubnetIPRange {
        SubnetIPRange::cidr(cidr.parse().unwrap(), subnet(gateway, prefix_length))
    }

    fn bounds_range(start: &str, end: &str) -> SubnetIPRange {
        SubnetIPRange::bounds(ip(start), ip(end), subnet("10.0.0.1", 24))
    }

    fn pod(name: &str) -> IPAddressOwner {
        PodOwner {
            name: name.to_owned(),
            namespace: "default".to_owned(),
            container_id: format!("container-{name}"),
            interface: Some("eth0".to_owned()),
        }
        .into()
    }

    fn quick_options(attempts: u32) -> PoolAllocatorOptions {
        PoolAllocatorOptionsBuilder::default()
            .retry(
                RetryPolicyBuilder::default()
                    .attempts(attempts)
                    .initial_backoff(Duration::from_millis(1))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    async fn store_with(ranges: Vec<SubnetIPRange>) -> Arc<InMemoryPoolStore> {
        let store = Arc::new(InMemoryPoolStore::new());

        store
            .apply_spec(POOL, IPPoolSpec { ip_ranges: ranges })
            .await;

        store
    }

    async fn allocator_for(
        ranges: Vec<SubnetIPRange>,
    ) -> (Arc<InMemoryPoolStore>, PoolAllocator<Arc<InMemoryPoolStore>>) {
        let store = store_with(ranges).await;
        let allocator = PoolAllocator::new(POOL, store.clone(), quick_options(5))
            .await
            .unwrap();

        (store, allocator)
    }

    #[derive(Clone, Copy)]
    enum Fault {
        Conflict,
        Unavailable,
    }

    /// Counts writes and fails the first `failures` of them with `fault`.
    struct FaultyStore {
        inner: InMemoryPoolStore,
        fault: Fault,
        failures: AtomicU32,
        writes: AtomicU32,
        read_delay: Duration,
    }

    impl FaultyStore {
        async fn new(fault: Fault, failures: u32) -> Self {
            let inner = InMemoryPoolStore::new();

            inner
                .apply_spec(
                    POOL,
                    IPPoolSpec {
                        ip_ranges: vec![bounds_range("10.0.0.5", "10.0.0.6")],
                    },
                )
                .await;

            Self {
                inner,
                fault,
                failures: AtomicU32::new(failures),
                writes: AtomicU32::new(0),
                read_delay: Duration::ZERO,
            }
        }

        fn writes(&self) -> u32 {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PoolStore for FaultyStore {
        async fn get(&self, name: &str) -> Result<PoolSnapshot, StoreError> {
            if !self.read_delay.is_zero() {
                tokio::time::sleep(self.read_delay).await;
            }

            self.inner.get(name).await
        }

        async fn update_status(
            &self,
            name: &str,
            status: &IPPoolStatus,
            version: &str,
        ) -> Result<String, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);

            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();

            match (failing, self.fault) {
                (true, Fault::Conflict) => Err(StoreError::Conflict(name.to_owned())),
                (true, Fault::Unavailable) => Err(StoreError::Unavailable("injected".into())),
                (false, _) => self.inner.update_status(name, status, version).await,
            }
        }
    }

    #[tokio::test]
    async fn full_slash_30_has_a_single_address() {
        let (store, allocator) = allocator_for(vec![cidr_range("10.0.0.0/30", "10.0.0.1", 30)]).await;

        let (first, subnet) = allocator
            .allocate_next(IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();

        assert_eq!(first, ip("10.0.0.2"));
        assert_eq!(subnet.gateway, ip("10.0.0.1"));
        assert!(matches!(
            allocator
                .allocate_next(IPAddressPhase::Allocated, pod("b"))
                .await,
            Err(PoolAllocatorError::PoolExhausted { pool }) if pool == POOL
        ));

        let snapshot = store.get(POOL).await.unwrap();

        assert_eq!(snapshot.status.usage, Some(IPPoolUsage { total: 1, used: 1 }));
        assert_eq!(snapshot.status.ip_addresses.len(), 1);
    }

    #[tokio::test]
    async fn carved_block_keeps_the_broadcast_address() {
        let (_, allocator) =
            allocator_for(vec![cidr_range("10.0.0.192/26", "10.0.0.1", 24)]).await;

        allocator
            .allocate_ip(ip("10.0.0.255"), IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();

        assert_eq!(
            allocator.usage().await.unwrap(),
            IPPoolUsage { total: 63, used: 1 }
        );
    }

    #[tokio::test]
    async fn ipv6_subnet_hands_out_its_last_address() {
        let (store, allocator) =
            allocator_for(vec![cidr_range("fd00::/126", "fd00::1", 126)]).await;

        for (name, expected) in [("a", "fd00::2"), ("b", "fd00::3")] {
            let (allocated, subnet) = allocator
                .allocate_next(IPAddressPhase::Allocated, pod(name))
                .await
                .unwrap();

            assert_eq!(allocated, ip(expected));
            assert_eq!(subnet.gateway, ip("fd00::1"));
        }

        assert!(matches!(
            allocator
                .allocate_next(IPAddressPhase::Allocated, pod("c"))
                .await,
            Err(PoolAllocatorError::PoolExhausted { .. })
        ));

        let snapshot = store.get(POOL).await.unwrap();

        assert_eq!(snapshot.status.usage, Some(IPPoolUsage { total: 2, used: 2 }));
    }

    #[tokio::test]
    async fn explicit_bounds_are_inclusive() {
        let (_, allocator) = allocator_for(vec![bounds_range("10.0.0.5", "10.0.0.6")]).await;

        for (name, expected) in [("a", "10.0.0.5"), ("b", "10.0.0.6")] {
            let (allocated, _) = allocator
                .allocate_next(IPAddressPhase::Allocated, pod(name))
                .await
                .unwrap();

            assert_eq!(allocated, ip(expected));
        }

        assert!(matches!(
            allocator
                .allocate_ip(ip("10.0.0.7"), IPAddressPhase::Allocated, pod("c"))
                .await,
            Err(PoolAllocatorError::NotInPool { .. })
        ));
    }

    #[tokio::test]
    async fn released_addresses_can_be_claimed_again() {
        let (store, allocator) = allocator_for(vec![bounds_range("10.0.0.5", "10.0.0.6")]).await;
        let target = ip("10.0.0.6");

        allocator
            .allocate_ip(target, IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();
        allocator.release(target).await.unwrap();

        assert!(store.get(POOL).await.unwrap().status.ip_addresses.is_empty());

        let subnet = allocator
            .allocate_ip(target, IPAddressPhase::Preallocated, pod("b"))
            .await
            .unwrap();
        let status = allocator.status().await.unwrap();

        assert_eq!(subnet.prefix_length, 24);
        assert_eq!(status.ip_addresses.len(), 1);
        assert_eq!(status.ip_addresses[0].phase, IPAddressPhase::Preallocated);
        assert_eq!(status.ip_addresses[0].owner, pod("b"));
    }

    #[tokio::test]
    async fn double_allocation_and_release_are_refused() {
        let (_, allocator) = allocator_for(vec![bounds_range("10.0.0.5", "10.0.0.6")]).await;

        allocator
            .allocate_ip(ip("10.0.0.5"), IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();

        assert!(matches!(
            allocator
                .allocate_ip(ip("10.0.0.5"), IPAddressPhase::Allocated, pod("b"))
                .await,
            Err(PoolAllocatorError::AlreadyAllocated { .. })
        ));
        assert!(matches!(
            allocator.release(ip("10.0.0.6")).await,
            Err(PoolAllocatorError::NotAllocated { .. })
        ));
    }

    #[tokio::test]
    async fn owner_gets_a_single_address_without_extra_writes() {
        let store = Arc::new(FaultyStore::new(Fault::Conflict, 0).await);
        let allocator = PoolAllocator::unchecked(POOL, store.clone(), quick_options(5));

        allocator
            .allocate_next(IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();

        assert_eq!(store.writes(), 1);

        let mut restarted = pod("a");

        if let IPAddressOwner::Pod(pod) = &mut restarted {
            pod.interface = Some("eth1".to_owned());
        }

        assert!(matches!(
            allocator
                .allocate_next(IPAddressPhase::Allocated, restarted)
                .await,
            Err(PoolAllocatorError::OwnerAlreadyHasAllocation { .. })
        ));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn release_by_owner_requires_a_match() {
        let (_, allocator) = allocator_for(vec![bounds_range("10.0.0.5", "10.0.0.6")]).await;
        let missing = OwnerSelector::pod("default", "nope");

        allocator
            .allocate_ip(ip("10.0.0.6"), IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();

        assert!(matches!(
            allocator.release_by_owner(&missing).await,
            Err(PoolAllocatorError::OwnerNotFound { .. })
        ));
        assert_eq!(allocator.release_if_present(&missing).await.unwrap(), None);

        assert!(allocator
            .has_owner(&OwnerSelector::container("container-a"))
            .await
            .unwrap());
        assert_eq!(
            allocator
                .release_by_owner(&OwnerSelector::pod("default", "a"))
                .await
                .unwrap(),
            ip("10.0.0.6")
        );
        assert!(!allocator
            .has_owner(&OwnerSelector::container("container-a"))
            .await
            .unwrap());
        assert_eq!(
            allocator
                .release_if_present(&OwnerSelector::container("container-a"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn records_outside_every_range_are_never_repaired() {
        let store = Arc::new(FaultyStore::new(Fault::Conflict, 0).await);
        let stray = IPAddressState {
            ip_address: ip("10.0.9.9"),
            phase: IPAddressPhase::Allocated,
            owner: pod("stray"),
        };

        store
            .inner
            .force_status(
                POOL,
                IPPoolStatus {
                    ip_addresses: vec![stray.clone()],
                    usage: None,
                },
            )
            .await
            .unwrap();

        let allocator = PoolAllocator::unchecked(POOL, store.clone(), quick_options(5));

        assert!(matches!(
            allocator
                .allocate_next(IPAddressPhase::Allocated, pod("a"))
                .await,
            Err(PoolAllocatorError::StateInconsistency { ip: inconsistent, .. })
                if inconsistent == stray.ip_address
        ));
        assert!(matches!(
            allocator.release(stray.ip_address).await,
            Err(PoolAllocatorError::StateInconsistency { .. })
        ));
        assert!(matches!(
            allocator.has_owner(&OwnerSelector::from(&stray.owner)).await,
            Err(PoolAllocatorError::StateInconsistency { .. })
        ));
        assert_eq!(store.writes(), 0);
        assert_eq!(store.get(POOL).await.unwrap().status.ip_addresses, vec![stray]);
    }

    #[tokio::test]
    async fn constant_conflicts_exhaust_the_retry_budget() {
        let store = Arc::new(FaultyStore::new(Fault::Conflict, u32::MAX).await);
        let allocator = PoolAllocator::unchecked(POOL, store.clone(), quick_options(3));

        assert!(matches!(
            allocator
                .allocate_ip(ip("10.0.0.5"), IPAddressPhase::Allocated, pod("a"))
                .await,
            Err(PoolAllocatorError::ConflictRetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(store.writes(), 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(FaultyStore::new(Fault::Conflict, 2).await);
        let allocator = PoolAllocator::unchecked(POOL, store.clone(), quick_options(3));

        allocator
            .allocate_ip(ip("10.0.0.5"), IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();

        assert_eq!(store.writes(), 3);

        let store = Arc::new(FaultyStore::new(Fault::Unavailable, u32::MAX).await);
        let allocator = PoolAllocator::unchecked(POOL, store.clone(), quick_options(2));

        assert!(matches!(
            allocator.release(ip("10.0.0.5")).await,
            Err(PoolAllocatorError::NotAllocated { .. })
        ));
        assert!(matches!(
            allocator
                .allocate_ip(ip("10.0.0.5"), IPAddressPhase::Allocated, pod("a"))
                .await,
            Err(PoolAllocatorError::StoreUnavailable {
                source: StoreError::Unavailable(_),
                ..
            })
        ));
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn operations_stop_at_the_deadline() {
        let mut store = FaultyStore::new(Fault::Conflict, u32::MAX).await;
        let options = PoolAllocatorOptions {
            retry: RetryPolicy {
                initial_backoff: Duration::from_secs(5),
                ..Default::default()
            },
            operation_timeout: Some(Duration::from_millis(50)),
        };

        // backing off would outlive the deadline
        let allocator = PoolAllocator::unchecked(POOL, Arc::new(store), options.clone());

        assert!(matches!(
            allocator
                .allocate_ip(ip("10.0.0.5"), IPAddressPhase::Allocated, pod("a"))
                .await,
            Err(PoolAllocatorError::DeadlineExceeded { .. })
        ));

        store = FaultyStore::new(Fault::Conflict, 0).await;
        store.read_delay = Duration::from_secs(5);

        let allocator = PoolAllocator::unchecked(POOL, store, options);

        assert!(matches!(
            allocator.usage().await,
            Err(PoolAllocatorError::DeadlineExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn missing_pools_and_bad_ranges_are_refused_upfront() {
        let store = Arc::new(InMemoryPoolStore::new());

        assert!(matches!(
            PoolAllocator::new(POOL, store.clone(), PoolAllocatorOptions::default()).await,
            Err(PoolAllocatorError::PoolNotFound { .. })
        ));

        store
            .apply_spec(
                POOL,
                IPPoolSpec {
                    ip_ranges: vec![bounds_range("10.0.0.6", "10.0.0.5")],
                },
            )
            .await;

        assert!(matches!(
            PoolAllocator::new(POOL, store.clone(), PoolAllocatorOptions::default()).await,
            Err(PoolAllocatorError::InvalidRange { .. })
        ));

        store
            .apply_spec(
                POOL,
                IPPoolSpec {
                    ip_ranges: vec![cidr_range("10.0.0.7/32", "10.0.0.1", 24)],
                },
            )
            .await;

        assert!(matches!(
            PoolAllocator::new(POOL, store.clone(), PoolAllocatorOptions::default()).await,
            Err(PoolAllocatorError::InvalidRange { .. })
        ));

        store.remove(POOL).await;

        let allocator = PoolAllocator::unchecked(POOL, store, PoolAllocatorOptions::default());

        assert!(matches!(
            allocator
                .release_if_present(&OwnerSelector::container("a"))
                .await,
            Err(PoolAllocatorError::PoolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn extended_ranges_are_used_on_the_next_call() {
        let (store, allocator) = allocator_for(vec![bounds_range("10.0.0.5", "10.0.0.5")]).await;

        allocator
            .allocate_next(IPAddressPhase::Allocated, pod("a"))
            .await
            .unwrap();

        assert!(matches!(
            allocator
                .allocate_next(IPAddressPhase::Allocated, pod("b"))
                .await,
            Err(PoolAllocatorError::PoolExhausted { .. })
        ));

        store
            .apply_spec(
                POOL,
                IPPoolSpec {
                    ip_ranges: vec![
                        bounds_range("10.0.0.5", "10.0.0.5"),
                        bounds_range("10.0.1.10", "10.0.1.11"),
                    ],
                },
            )
            .await;

        let (allocated, _) = allocator
            .allocate_next(IPAddressPhase::Allocated, pod("b"))
            .await
            .unwrap();

        assert_eq!(allocated, ip("10.0.1.10"));
        assert_eq!(
            allocator.usage().await.unwrap(),
            IPPoolUsage { total: 3, used: 2 }
        );
    }

    #[tokio::test]
    async fn concurrent_callers_never_share_an_address() {
        const FREE: usize = 5;

        let store = store_with(vec![cidr_range("10.0.0.0/29", "10.0.0.1", 29)]).await;
        let allocators = (0..=FREE)
            .map(|_| PoolAllocator::unchecked(POOL, store.clone(), quick_options(FREE as u32 + 2)))
            .collect::<Vec<_>>();

        let results = join_all(allocators.iter().enumerate().map(|(index, allocator)| {
            allocator.allocate_next(IPAddressPhase::Allocated, pod(&format!("pod-{index}")))
        }))
        .await;

        let mut allocated = results
            .iter()
            .filter_map(|result| result.as_ref().ok().map(|(ip, _)| *ip))
            .collect::<Vec<_>>();
        let failures = results
            .iter()
            .filter(|result| {
                matches!(
                    result,
                    Err(PoolAllocatorError::PoolExhausted { .. }
                        | PoolAllocatorError::ConflictRetriesExhausted { .. })
                )
            })
            .count();

        allocated.sort();
        allocated.dedup();

        assert_eq!(allocated.len(), FREE);
        assert_eq!(failures, 1);
        assert_eq!(
            store.get(POOL).await.unwrap().status.ip_addresses.len(),
            FREE
        );
    }
}

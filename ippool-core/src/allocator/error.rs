use std::net::IpAddr;

use thiserror::Error;

use crate::{ip::RangeError, store::StoreError};

#[derive(Debug, Error)]
pub enum PoolAllocatorError {
    #[error("Address {ip} doesn't belong to pool '{pool}'!")]
    NotInPool { pool: String, ip: IpAddr },
    #[error("Address {ip} is already allocated in pool '{pool}'!")]
    AlreadyAllocated { pool: String, ip: IpAddr },
    #[error("Address {ip} is not allocated in pool '{pool}'!")]
    NotAllocated { pool: String, ip: IpAddr },
    #[error("Pool '{pool}' has no free addresses left!")]
    PoolExhausted { pool: String },
    #[error("{owner} already has an address allocated in pool '{pool}'!")]
    OwnerAlreadyHasAllocation { pool: String, owner: String },
    #[error("Pool '{pool}' has no address allocated to {owner}!")]
    OwnerNotFound { pool: String, owner: String },
    #[error("Pool '{pool}' status doesn't match its ranges at {ip}! Reason: {source}")]
    StateInconsistency {
        pool: String,
        ip: IpAddr,
        source: RangeError,
    },
    #[error("Pool '{pool}' has an invalid range! Reason: {source}")]
    InvalidRange { pool: String, source: RangeError },
    #[error("Pool '{pool}' kept changing, gave up after {attempts} attempts!")]
    ConflictRetriesExhausted { pool: String, attempts: u32 },
    #[error("Couldn't access pool '{pool}'! Reason: {source}")]
    StoreUnavailable { pool: String, source: StoreError },
    #[error("Pool '{pool}' doesn't exist!")]
    PoolNotFound { pool: String },
    #[error("Operation on pool '{pool}' didn't finish in time!")]
    DeadlineExceeded { pool: String },
}

impl PoolAllocatorError {
    /// Attaches pool context to a failed range operation on `ip`.
    pub(crate) fn from_range(pool: &str, error: RangeError) -> Self {
        let pool = pool.to_owned();

        match error {
            RangeError::OutOfRange(ip) | RangeError::Reserved(ip) | RangeError::NotInPool(ip) => {
                PoolAllocatorError::NotInPool { pool, ip }
            }
            RangeError::AlreadyAllocated(ip) => PoolAllocatorError::AlreadyAllocated { pool, ip },
            RangeError::NotAllocated(ip) => PoolAllocatorError::NotAllocated { pool, ip },
            RangeError::Exhausted => PoolAllocatorError::PoolExhausted { pool },
            source @ RangeError::Invalid(_) => PoolAllocatorError::InvalidRange { pool, source },
        }
    }

    pub fn pool(&self) -> &str {
        match self {
            PoolAllocatorError::NotInPool { pool, .. }
            | PoolAllocatorError::AlreadyAllocated { pool, .. }
            | PoolAllocatorError::NotAllocated { pool, .. }
            | PoolAllocatorError::PoolExhausted { pool }
            | PoolAllocatorError::OwnerAlreadyHasAllocation { pool, .. }
            | PoolAllocatorError::OwnerNotFound { pool, .. }
            | PoolAllocatorError::StateInconsistency { pool, .. }
            | PoolAllocatorError::InvalidRange { pool, .. }
            | PoolAllocatorError::ConflictRetriesExhausted { pool, .. }
            | PoolAllocatorError::StoreUnavailable { pool, .. }
            | PoolAllocatorError::PoolNotFound { pool }
            | PoolAllocatorError::DeadlineExceeded { pool } => pool,
        }
    }
}

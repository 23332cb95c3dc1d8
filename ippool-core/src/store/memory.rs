use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::resources::crd::v1alpha2::ippool::{IPPoolSpec, IPPoolStatus};

use super::{PoolSnapshot, PoolStore, StoreError};

#[derive(Debug)]
struct StoredPool {
    spec: IPPoolSpec,
    status: IPPoolStatus,
    version: u64,
}

/// Process local store with the same compare-and-swap semantics as the kubernetes one.
#[derive(Debug, Default)]
pub struct InMemoryPoolStore {
    pools: Mutex<HashMap<String, StoredPool>>,
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool or replaces its spec, keeping whatever status it already had.
    pub async fn apply_spec(&self, name: &str, spec: IPPoolSpec) {
        let mut pools = self.pools.lock().await;

        match pools.get_mut(name) {
            Some(pool) => {
                pool.spec = spec;
                pool.version += 1;
            }
            None => {
                pools.insert(
                    name.to_owned(),
                    StoredPool {
                        spec,
                        status: IPPoolStatus::default(),
                        version: 1,
                    },
                );
            }
        }
    }

    /// Overwrites the status unconditionally, the way an out of band writer would.
    pub async fn force_status(&self, name: &str, status: IPPoolStatus) -> Result<(), StoreError> {
        let mut pools = self.pools.lock().await;
        let pool = pools
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;

        pool.status = status;
        pool.version += 1;

        Ok(())
    }

    pub async fn remove(&self, name: &str) -> bool {
        self.pools.lock().await.remove(name).is_some()
    }
}

#[async_trait]
impl PoolStore for InMemoryPoolStore {
    async fn get(&self, name: &str) -> Result<PoolSnapshot, StoreError> {
        let snapshot = {
            let pools = self.pools.lock().await;
            let pool = pools
                .get(name)
                .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;

            PoolSnapshot {
                name: name.to_owned(),
                spec: pool.spec.clone(),
                status: pool.status.clone(),
                version: pool.version.to_string(),
            }
        };

        // let other tasks in between the read and the following write,
        // the way a network round trip would
        tokio::task::yield_now().await;

        Ok(snapshot)
    }

    async fn update_status(
        &self,
        name: &str,
        status: &IPPoolStatus,
        version: &str,
    ) -> Result<String, StoreError> {
        let mut pools = self.pools.lock().await;
        let pool = pools
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;

        if pool.version.to_string() != version {
            return Err(StoreError::Conflict(name.to_owned()));
        }

        pool.status = status.clone();
        pool.version += 1;

        Ok(pool.version.to_string())
    }
}

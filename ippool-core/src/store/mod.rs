//! Versioned access to persisted pools.
//!
//! A store hands out a [`PoolSnapshot`] together with an opaque version token and only accepts a
//! status write when it's based on the latest version. This compare-and-swap is the only thing
//! that keeps concurrent allocators from handing out the same address twice.

use std::{borrow::Cow, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::resources::crd::v1alpha2::ippool::{IPPool, IPPoolSpec, IPPoolStatus};

pub mod kubernetes;
pub mod memory;

/// Spec and status of a pool as observed at `version`.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub name: String,
    pub spec: IPPoolSpec,
    pub status: IPPoolStatus,
    pub version: String,
}

impl TryFrom<IPPool> for PoolSnapshot {
    type Error = StoreError;

    fn try_from(value: IPPool) -> Result<Self, Self::Error> {
        let name = value.metadata.name.unwrap_or_default();
        let version = value
            .metadata
            .resource_version
            .ok_or_else(|| StoreError::MissingVersion(name.clone()))?;

        Ok(Self {
            name,
            spec: value.spec,
            status: value.status.unwrap_or_default(),
            version,
        })
    }
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<PoolSnapshot, StoreError>;

    /// Replaces the pool status if the pool is still at `version`, returns the new version.
    async fn update_status(
        &self,
        name: &str,
        status: &IPPoolStatus,
        version: &str,
    ) -> Result<String, StoreError>;
}

#[async_trait]
impl<T: PoolStore + ?Sized> PoolStore for Arc<T> {
    async fn get(&self, name: &str) -> Result<PoolSnapshot, StoreError> {
        (**self).get(name).await
    }

    async fn update_status(
        &self,
        name: &str,
        status: &IPPoolStatus,
        version: &str,
    ) -> Result<String, StoreError> {
        (**self).update_status(name, status, version).await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Pool '{}' doesn't exist!", .0)]
    NotFound(String),
    #[error("Pool '{}' was modified since it was read!", .0)]
    Conflict(String),
    #[error("Pool '{}' was returned without a resource version!", .0)]
    MissingVersion(String),
    #[error("Couldn't reach the kubernetes API! Reason: {}", .0)]
    KubeApiError(kube::Error),
    #[error("Pool store is unavailable! Reason: {}", .0)]
    Unavailable(Cow<'static, str>),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict(_) | StoreError::Unavailable(_) => true,
            StoreError::KubeApiError(kube::Error::Api(response)) => {
                response.code >= 500 || response.code == 429
            }
            StoreError::KubeApiError(kube::Error::SerdeError(_)) => false,
            StoreError::KubeApiError(_) => true,
            StoreError::NotFound(_) | StoreError::MissingVersion(_) => false,
        }
    }
}

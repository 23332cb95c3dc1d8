use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams},
    Api, Client,
};
use log::trace;
use serde_json::{json, Value};

use crate::resources::crd::v1alpha2::ippool::{IPPool, IPPoolStatus};

use super::{PoolSnapshot, PoolStore, StoreError};

/// Pools stored as cluster scoped `IPPool` resources.
///
/// Status writes carry the observed `resourceVersion`, so the API server rejects them with
/// 409 Conflict once anyone else has written the pool in the meantime.
#[derive(Clone)]
pub struct KubePoolStore {
    api: Api<IPPool>,
}

impl KubePoolStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl PoolStore for KubePoolStore {
    async fn get(&self, name: &str) -> Result<PoolSnapshot, StoreError> {
        let pool = self
            .api
            .get(name)
            .await
            .map_err(|error| map_kube_error(name, error))?;

        PoolSnapshot::try_from(pool)
    }

    async fn update_status(
        &self,
        name: &str,
        status: &IPPoolStatus,
        version: &str,
    ) -> Result<String, StoreError> {
        let patch = status_patch(status, version);

        trace!("Patching '{name}' status at version {version}: {patch}");

        let pool = self
            .api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|error| map_kube_error(name, error))?;

        pool.metadata
            .resource_version
            .ok_or_else(|| StoreError::MissingVersion(name.to_owned()))
    }
}

/// Merge patch writing the whole status only while the pool is still at `version`.
///
/// A merge patch replaces lists as a whole, so the allocation list is swapped atomically
/// together with the version check. An empty list must stay in the patch or a release of
/// the last address would leave the old entries behind.
fn status_patch(status: &IPPoolStatus, version: &str) -> Value {
    json!({
        "metadata": { "resourceVersion": version },
        "status": status,
    })
}

fn map_kube_error(name: &str, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict(name.to_owned()),
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound(name.to_owned()),
        error => StoreError::KubeApiError(error),
    }
}

#[cfg(test)]
mod tests {
    use kube::error::ErrorResponse;
    use serde_json::json;

    use super::{map_kube_error, status_patch};
    use crate::{
        resources::crd::v1alpha2::ippool::{
            IPAddressPhase, IPAddressState, IPPoolStatus, IPPoolUsage, PodOwner,
        },
        store::StoreError,
    };

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: format!("{reason} test"),
            reason: reason.to_owned(),
            code,
        })
    }

    #[test]
    fn api_errors_map_to_store_errors() {
        assert!(matches!(
            map_kube_error("pool-a", api_error(409, "Conflict")),
            StoreError::Conflict(name) if name == "pool-a"
        ));
        assert!(matches!(
            map_kube_error("pool-a", api_error(404, "NotFound")),
            StoreError::NotFound(_)
        ));

        let server_error = map_kube_error("pool-a", api_error(503, "ServiceUnavailable"));
        let forbidden = map_kube_error("pool-a", api_error(403, "Forbidden"));

        assert!(server_error.is_transient());
        assert!(!forbidden.is_transient());
    }

    #[test]
    fn emptied_status_still_clears_the_allocation_list() {
        let status = IPPoolStatus {
            ip_addresses: Vec::new(),
            usage: Some(IPPoolUsage { total: 2, used: 0 }),
        };

        let patch = status_patch(&status, "7");

        assert_eq!(patch["metadata"]["resourceVersion"], json!("7"));
        assert_eq!(patch["status"]["ipAddresses"], json!([]));
        assert_eq!(patch["status"]["usage"], json!({ "total": 2, "used": 0 }));
    }

    #[test]
    fn status_patch_carries_every_allocation() {
        let status = IPPoolStatus {
            ip_addresses: vec![IPAddressState {
                ip_address: "10.0.0.2".parse().unwrap(),
                phase: IPAddressPhase::Allocated,
                owner: PodOwner {
                    name: "web-0".to_owned(),
                    namespace: "default".to_owned(),
                    container_id: "abc".to_owned(),
                    interface: None,
                }
                .into(),
            }],
            usage: None,
        };

        let patch = status_patch(&status, "42");
        let addresses = patch["status"]["ipAddresses"]
            .as_array()
            .expect("allocation list");

        assert_eq!(patch["metadata"]["resourceVersion"], json!("42"));
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0]["ipAddress"], json!("10.0.0.2"));
    }
}

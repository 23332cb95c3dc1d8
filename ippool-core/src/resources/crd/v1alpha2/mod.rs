use kube::{Client, CustomResourceExt};

use crate::kubernetes::operations::apply_crd;

use self::ippool::IPPool;

pub mod ippool;

/// Applies every v1alpha2 CRD, returning the names of those that were installed before.
pub async fn create_v1alpha2_crds(client: &Client, dry_run: bool) -> anyhow::Result<Vec<String>> {
    let ippool_spec = IPPool::crd();
    let mut updated = Vec::new();

    if apply_crd(client, &ippool_spec, dry_run).await? {
        updated.push(IPPool::crd_name().to_owned());
    }

    Ok(updated)
}

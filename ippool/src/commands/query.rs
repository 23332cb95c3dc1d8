use ippool_core::allocator::OwnerSelector;
use kube::Client;

use crate::cli::{ContainerArgs, GlobalArgs, PodArgs};

use super::create_allocator;

pub async fn has_pod(
    global_args: &GlobalArgs,
    args: &PodArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let selector = OwnerSelector::pod(&args.namespace, &args.pod);

    has_owner(global_args, &args.pool, &selector, client).await
}

pub async fn has_container(
    global_args: &GlobalArgs,
    args: &ContainerArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let selector = OwnerSelector::container(&args.container_id);

    has_owner(global_args, &args.pool, &selector, client).await
}

async fn has_owner(
    global_args: &GlobalArgs,
    pool: &str,
    selector: &OwnerSelector,
    client: &Client,
) -> anyhow::Result<()> {
    let allocator = create_allocator(global_args, pool, client).await?;

    println!("{}", allocator.has_owner(selector).await?);

    Ok(())
}

use std::net::IpAddr;

use ippool_core::{
    allocator::{OwnerSelector, PoolAllocator},
    store::kubernetes::KubePoolStore,
};
use kube::Client;
use log::info;

use crate::cli::{GlobalArgs, ReleaseArgs, ReleaseContainerArgs, ReleasePodArgs};

use super::create_allocator;

pub async fn release(
    global_args: &GlobalArgs,
    args: &ReleaseArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let allocator = create_allocator(global_args, &args.pool, client).await?;

    allocator.release(args.ip).await?;

    println!("{}", args.ip);

    Ok(())
}

pub async fn release_pod(
    global_args: &GlobalArgs,
    args: &ReleasePodArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let allocator = create_allocator(global_args, &args.pod.pool, client).await?;
    let selector = OwnerSelector::pod(&args.pod.namespace, &args.pod.pod);

    release_owner(&allocator, &selector, args.if_present).await
}

pub async fn release_container(
    global_args: &GlobalArgs,
    args: &ReleaseContainerArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let allocator = create_allocator(global_args, &args.container.pool, client).await?;
    let selector = OwnerSelector::container(&args.container.container_id);

    release_owner(&allocator, &selector, args.if_present).await
}

async fn release_owner(
    allocator: &PoolAllocator<KubePoolStore>,
    selector: &OwnerSelector,
    if_present: bool,
) -> anyhow::Result<()> {
    let released: Option<IpAddr> = if if_present {
        allocator.release_if_present(selector).await?
    } else {
        Some(allocator.release_by_owner(selector).await?)
    };

    match released {
        Some(ip) => println!("{ip}"),
        None => info!("{selector} holds no address, nothing to release!"),
    }

    Ok(())
}

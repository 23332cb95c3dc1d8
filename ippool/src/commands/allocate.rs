use ippool_core::resources::crd::v1alpha2::ippool::SubnetInfo;
use kube::Client;

use crate::cli::{AllocateArgs, AllocateNextArgs, GlobalArgs};

use super::create_allocator;

pub async fn allocate(
    global_args: &GlobalArgs,
    args: &AllocateArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let allocator = create_allocator(global_args, &args.pool, client).await?;
    let subnet = allocator
        .allocate_ip(
            args.ip,
            args.owner.phase.into(),
            args.owner.to_owner().into(),
        )
        .await?;

    print_allocation(&args.ip, &subnet);

    Ok(())
}

pub async fn allocate_next(
    global_args: &GlobalArgs,
    args: &AllocateNextArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let allocator = create_allocator(global_args, &args.pool, client).await?;
    let (ip, subnet) = allocator
        .allocate_next(args.owner.phase.into(), args.owner.to_owner().into())
        .await?;

    print_allocation(&ip, &subnet);

    Ok(())
}

fn print_allocation(ip: &impl std::fmt::Display, subnet: &SubnetInfo) {
    let vlan = subnet
        .vlan
        .map(|vlan| format!(" vlan {vlan}"))
        .unwrap_or_default();

    println!(
        "{ip}/{} gateway {}{vlan}",
        subnet.prefix_length, subnet.gateway
    );
}

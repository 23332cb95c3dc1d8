use std::path::Path;

use anyhow::Context;
use ippool_core::{
    allocator::PoolAllocator, config::AllocatorConfig, store::kubernetes::KubePoolStore,
};
use kube::Client;
use log::debug;

use crate::cli::GlobalArgs;

pub mod allocate;
pub mod install_crd;
pub mod query;
pub mod release;
pub mod show;

pub async fn create_allocator(
    global_args: &GlobalArgs,
    pool: &str,
    client: &Client,
) -> anyhow::Result<PoolAllocator<KubePoolStore>> {
    let config = match &global_args.config {
        Some(path) => AllocatorConfig::load(Path::new(path))
            .with_context(|| format!("Couldn't load allocator configuration from {path}!"))?,
        None => AllocatorConfig::default(),
    };

    debug!("Using allocator configuration: {config:?}");

    let allocator = PoolAllocator::new(
        pool,
        KubePoolStore::new(client.clone()),
        config.to_options(),
    )
    .await?;

    Ok(allocator)
}

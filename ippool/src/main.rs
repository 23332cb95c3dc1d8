use anyhow::Context;
use clap::Parser;
use cli::{Commands, GlobalArgs, LogLevel};
use commands::{
    allocate::{allocate, allocate_next},
    install_crd::install_crd,
    query::{has_container, has_pod},
    release::{release, release_container, release_pod},
    show::show,
};
use env_logger::Target;
use ippool_core::kubernetes::operations::create_local_client;
use log::LevelFilter;

use crate::cli::Cli;

mod cli;
mod commands;
mod output;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let global_args = &cli.global_args;

    configure_logging(global_args);

    let client = create_local_client(&global_args.kube_config, &global_args.kube_context)
        .await
        .context("Couldn't initialize k8s API client!")?;

    match &cli.command {
        Commands::InstallCrd(args) => install_crd(args, &client).await?,
        Commands::Allocate(args) => allocate(global_args, args, &client).await?,
        Commands::AllocateNext(args) => allocate_next(global_args, args, &client).await?,
        Commands::Release(args) => release(global_args, args, &client).await?,
        Commands::ReleasePod(args) => release_pod(global_args, args, &client).await?,
        Commands::ReleaseContainer(args) => release_container(global_args, args, &client).await?,
        Commands::HasPod(args) => has_pod(global_args, args, &client).await?,
        Commands::HasContainer(args) => has_container(global_args, args, &client).await?,
        Commands::Show(args) => show(global_args, args, &client).await?,
    }

    Ok(())
}

fn configure_logging(global_args: &GlobalArgs) {
    let log_level = global_args.get_log_level();
    let mut logger = env_logger::builder();

    logger
        .format_timestamp(None)
        .format_module_path(matches!(log_level, LogLevel::Trace))
        .format_target(false)
        .format_level(!matches!(log_level, LogLevel::Normal))
        .target(Target::Stderr);

    if let LogLevel::Normal = log_level {
        logger.filter(Some("ippool"), LevelFilter::Info);
        logger.filter(Some("ippool_core"), LevelFilter::Info);
    }

    if let LogLevel::Verbose = log_level {
        logger.filter(Some("ippool"), LevelFilter::Debug);
        logger.filter(Some("ippool_core"), LevelFilter::Debug);
    }

    if let LogLevel::Trace = log_level {
        logger.filter(None, LevelFilter::Trace);
    }

    logger.init();
}

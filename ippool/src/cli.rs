use std::net::IpAddr;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ippool_core::resources::crd::v1alpha2::ippool::{IPAddressPhase, PodOwner};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    #[command(flatten)]
    pub global_args: GlobalArgs,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// override default kubeconfig
    #[arg(long, global = true)]
    pub kube_config: Option<String>,
    /// override default kubeconfig context
    #[arg(long, global = true)]
    pub kube_context: Option<String>,
    /// allocator configuration file (retry budget, timeouts)
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose_logging: bool,
    /// enable trace output (more detailed than verbose, overrides it if present)
    #[arg(long = "trace", global = true)]
    pub trace_logging: bool,
}

impl GlobalArgs {
    pub fn get_log_level(&self) -> LogLevel {
        if self.trace_logging {
            return LogLevel::Trace;
        }

        if self.verbose_logging {
            return LogLevel::Verbose;
        }

        LogLevel::Normal
    }
}

pub enum LogLevel {
    Normal,
    Verbose,
    Trace,
}

#[derive(Debug, Subcommand)]
#[command(arg_required_else_help = true)]
pub enum Commands {
    /// install or update the IPPool CRD on the cluster
    InstallCrd(InstallCrdArgs),
    /// allocate a specific address to a pod
    #[command(alias = "a")]
    Allocate(AllocateArgs),
    /// allocate the next free address to a pod
    #[command(alias = "an")]
    AllocateNext(AllocateNextArgs),
    /// release an address
    #[command(alias = "r")]
    Release(ReleaseArgs),
    /// release the address held by a pod
    ReleasePod(ReleasePodArgs),
    /// release the address held by a container
    ReleaseContainer(ReleaseContainerArgs),
    /// check whether a pod holds an address
    HasPod(PodArgs),
    /// check whether a container holds an address
    HasContainer(ContainerArgs),
    /// show the usage and allocations of a pool
    #[command(alias = "s")]
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct InstallCrdArgs {
    /// if set, no action will be taken on the cluster
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value()]
pub enum Phase {
    #[value(name = "Allocated")]
    Allocated,
    #[value(name = "Preallocated")]
    Preallocated,
    #[value(name = "Reserved")]
    Reserved,
}

impl From<Phase> for IPAddressPhase {
    fn from(value: Phase) -> Self {
        match value {
            Phase::Allocated => IPAddressPhase::Allocated,
            Phase::Preallocated => IPAddressPhase::Preallocated,
            Phase::Reserved => IPAddressPhase::Reserved,
        }
    }
}

#[derive(Debug, Args)]
pub struct OwnerArgs {
    /// namespace of the pod
    #[arg(short = 'n', long)]
    pub namespace: String,
    /// name of the pod
    #[arg(long)]
    pub pod: String,
    /// ID of the container the address is attached to
    #[arg(long)]
    pub container_id: String,
    /// interface the address is configured on
    #[arg(long)]
    pub interface: Option<String>,
    /// phase recorded with the allocation
    #[arg(long, value_enum, default_value_t = Phase::Allocated)]
    pub phase: Phase,
}

impl OwnerArgs {
    pub fn to_owner(&self) -> PodOwner {
        PodOwner {
            name: self.pod.clone(),
            namespace: self.namespace.clone(),
            container_id: self.container_id.clone(),
            interface: self.interface.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct AllocateArgs {
    /// name of the pool
    pub pool: String,
    /// address to claim
    pub ip: IpAddr,
    #[command(flatten)]
    pub owner: OwnerArgs,
}

#[derive(Debug, Args)]
pub struct AllocateNextArgs {
    /// name of the pool
    pub pool: String,
    #[command(flatten)]
    pub owner: OwnerArgs,
}

#[derive(Debug, Args)]
pub struct ReleaseArgs {
    /// name of the pool
    pub pool: String,
    /// address to release
    pub ip: IpAddr,
}

#[derive(Debug, Args)]
pub struct PodArgs {
    /// name of the pool
    pub pool: String,
    /// namespace of the pod
    #[arg(short = 'n', long)]
    pub namespace: String,
    /// name of the pod
    #[arg(long)]
    pub pod: String,
}

#[derive(Debug, Args)]
pub struct ContainerArgs {
    /// name of the pool
    pub pool: String,
    /// ID of the container
    pub container_id: String,
}

#[derive(Debug, Args)]
pub struct ReleasePodArgs {
    #[command(flatten)]
    pub pod: PodArgs,
    /// succeed even if the pod holds no address
    #[arg(long)]
    pub if_present: bool,
}

#[derive(Debug, Args)]
pub struct ReleaseContainerArgs {
    #[command(flatten)]
    pub container: ContainerArgs,
    /// succeed even if the container holds no address
    #[arg(long)]
    pub if_present: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value()]
pub enum OutputFormat {
    #[value(name = "table")]
    Table,
    #[value(name = "json")]
    Json,
    #[value(name = "json-pretty")]
    JsonPretty,
    #[value(name = "yaml")]
    Yaml,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// name of the pool
    pub pool: String,
    /// output format
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

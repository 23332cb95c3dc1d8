use std::net::IpAddr;

use ippool_core::resources::crd::v1alpha2::ippool::{
    IPAddressOwner, IPAddressPhase, IPAddressState, IPPoolStatus,
};
use kube::Client;

use crate::{
    cli::{GlobalArgs, OutputFormat, ShowArgs},
    output::{SerializableOutputDisplay, TableCellOption, TableOutputDisplay, TableOutputRow},
};

use super::create_allocator;

pub async fn show(
    global_args: &GlobalArgs,
    args: &ShowArgs,
    client: &Client,
) -> anyhow::Result<()> {
    let allocator = create_allocator(global_args, &args.pool, client).await?;
    let status = allocator.status().await?;

    match args.output {
        OutputFormat::Table => print_status(&args.pool, &status),
        OutputFormat::Json => status.print_json()?,
        OutputFormat::JsonPretty => status.print_json_pretty()?,
        OutputFormat::Yaml => status.print_yaml()?,
    }

    Ok(())
}

fn print_status(pool: &str, status: &IPPoolStatus) {
    let usage = status.usage.unwrap_or_default();

    println!("Pool '{pool}': {} of {} addresses used", usage.used, usage.total);

    if status.ip_addresses.is_empty() {
        return;
    }

    println!();

    status
        .ip_addresses
        .iter()
        .map(AllocationView::from)
        .print_table();
}

struct AllocationView<'a> {
    ip_address: &'a IpAddr,
    phase: &'a IPAddressPhase,
    owner_kind: &'static str,
    namespace: &'a str,
    name: &'a str,
    /// container ID for pods, replica index for stateful sets
    instance: String,
    interface: TableCellOption<&'a str>,
}

impl<'a> From<&'a IPAddressState> for AllocationView<'a> {
    fn from(value: &'a IPAddressState) -> Self {
        match &value.owner {
            IPAddressOwner::Pod(pod) => AllocationView {
                ip_address: &value.ip_address,
                phase: &value.phase,
                owner_kind: "Pod",
                namespace: &pod.namespace,
                name: &pod.name,
                instance: pod.container_id.clone(),
                interface: pod.interface.as_deref().into(),
            },
            IPAddressOwner::StatefulSet(set) => AllocationView {
                ip_address: &value.ip_address,
                phase: &value.phase,
                owner_kind: "StatefulSet",
                namespace: &set.namespace,
                name: &set.name,
                instance: set.index.to_string(),
                interface: None.into(),
            },
        }
    }
}

impl TableOutputRow for AllocationView<'_> {
    fn get_column_names() -> Vec<&'static str> {
        vec!["IP", "PHASE", "OWNER", "NAMESPACE", "NAME", "INSTANCE", "INTERFACE"]
    }

    fn get_row(&self) -> Vec<String> {
        vec![
            self.ip_address.to_string(),
            self.phase.to_string(),
            self.owner_kind.to_owned(),
            self.namespace.to_owned(),
            self.name.to_owned(),
            self.instance.clone(),
            self.interface.to_string(),
        ]
    }
}

use ippool_core::resources::crd::v1alpha2::create_v1alpha2_crds;
use kube::Client;
use log::info;

use crate::cli::InstallCrdArgs;

pub async fn install_crd(args: &InstallCrdArgs, client: &Client) -> anyhow::Result<()> {
    let updated = create_v1alpha2_crds(client, args.dry_run).await?;

    match (args.dry_run, updated.is_empty()) {
        (true, _) => info!("IPPool CRD validated (dry run), nothing was changed"),
        (false, true) => info!("IPPool CRD installed!"),
        (false, false) => info!("IPPool CRD updated!"),
    }

    Ok(())
}

use anyhow::{anyhow, Context};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};
use log::{debug, info};

use crate::FIELD_MANAGER;

/// Client for the cluster the allocator works against, read from the given kubeconfig or
/// the default one.
pub async fn create_local_client(
    config_path: &Option<String>,
    context_name: &Option<String>,
) -> anyhow::Result<Client> {
    let config_options = KubeConfigOptions {
        context: context_name.to_owned(),
        ..Default::default()
    };

    let config = match config_path {
        Some(path) => {
            debug!("Reading kubeconfig from {path}");

            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Unable to read kubeconfig at {path}!"))?;
            Config::from_custom_kubeconfig(kubeconfig, &config_options).await?
        }
        None => Config::from_kubeconfig(&config_options).await?,
    };

    debug!("Using cluster at {}", config.cluster_url);

    let client = Client::try_from(config).context("Unable to create the cluster client!")?;

    Ok(client)
}

/// Server side apply parameters owning the pool CRDs as [`FIELD_MANAGER`].
///
/// The apply is forced, so fields taken over from an earlier manual install don't block it.
pub fn crd_apply_params(dry_run: bool) -> PatchParams {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    match dry_run {
        true => params.dry_run(),
        false => params,
    }
}

/// Applies `crd` and reports whether it was already installed.
pub async fn apply_crd(
    client: &Client,
    crd: &CustomResourceDefinition,
    dry_run: bool,
) -> anyhow::Result<bool> {
    let crd_name = crd
        .metadata
        .name
        .as_ref()
        .ok_or_else(|| anyhow!("CRD is missing a name!"))?;
    let crd_apiversions = served_versions(crd);

    let crd_api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let installed = crd_api
        .get_opt(crd_name)
        .await
        .context(format!("Unable to look up {crd_name} CRD!"))?
        .is_some();

    match installed {
        true => info!("Updating {crd_name} ({crd_apiversions}) CRD..."),
        false => info!("Installing {crd_name} ({crd_apiversions}) CRD..."),
    }

    crd_api
        .patch(crd_name, &crd_apply_params(dry_run), &Patch::Apply(crd))
        .await
        .context(format!(
            "Unable to apply {crd_name} ({crd_apiversions}) CRD!"
        ))?;

    Ok(installed)
}

fn served_versions(crd: &CustomResourceDefinition) -> String {
    crd.spec
        .versions
        .iter()
        .filter(|version| version.served)
        .map(|version| match version.storage {
            true => format!("{} (storage)", version.name),
            false => version.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

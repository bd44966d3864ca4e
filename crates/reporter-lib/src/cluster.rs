//! Kubernetes client construction and point lookups

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::api::GetParams;
use kube::{Api, Client, Config};
use tracing::debug;

use crate::enrich::PodFetcher;
use crate::error::ReporterResult;
use crate::models::PodSnapshot;

/// Build a client from an explicit kubeconfig, or infer one
///
/// Inference tries the in-cluster service account first and then the
/// default kubeconfig location.
pub async fn make_client(kubeconfig: Option<&Path>) -> ReporterResult<Client> {
    let client = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
            Client::try_from(config)?
        }
        None => Client::try_default().await?,
    };
    Ok(client)
}

/// Fetches pods through the API server
#[derive(Clone)]
pub struct KubePodFetcher {
    client: Client,
}

impl KubePodFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodFetcher for KubePodFetcher {
    async fn fetch_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> ReporterResult<PodSnapshot> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = match resource_version {
            Some(rv) => api.get_with(name, &GetParams::at(rv)).await?,
            None => api.get(name).await?,
        };
        PodSnapshot::try_from(&pod)
    }
}

use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use crate::error::{Result, RouteAgentError};

#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    pub kubeconfig: Option<PathBuf>,
    pub master: Option<String>,
}

/// One client for the custom routing API group, one for core resources.
/// Both are built from the same connection config but share no state.
#[derive(Clone)]
pub struct ApiClients {
    pub routing: Client,
    pub core: Client,
}

impl ApiClients {
    pub async fn new(options: &ClientOptions) -> Result<Self> {
        let config = load_config(options).await?;
        info!("Using Kubernetes API server {}", config.cluster_url);

        let routing = Client::try_from(config.clone()).map_err(|e| {
            RouteAgentError::Connectivity(format!("Error building submariner clientset: {}", e))
        })?;
        let core = Client::try_from(config).map_err(|e| {
            RouteAgentError::Connectivity(format!("Error building clientset: {}", e))
        })?;

        Ok(Self { routing, core })
    }
}

pub async fn load_config(options: &ClientOptions) -> Result<Config> {
    let mut config = match &options.kubeconfig {
        Some(path) => {
            debug!("Loading kubeconfig from {}", path.display());
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                RouteAgentError::Connectivity(format!(
                    "Error building kubeconfig from {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    RouteAgentError::Connectivity(format!("Error building kubeconfig: {}", e))
                })?
        }
        None => {
            debug!("No kubeconfig given, inferring in-cluster configuration");
            Config::infer().await.map_err(|e| {
                RouteAgentError::Connectivity(format!("Error building kubeconfig: {}", e))
            })?
        }
    };

    if let Some(master) = &options.master {
        config.cluster_url = master.parse().map_err(|e| {
            RouteAgentError::Connectivity(format!("Invalid master URL {:?}: {}", master, e))
        })?;
    }

    Ok(config)
}

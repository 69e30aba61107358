use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouteAgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Unable to find the default interface on host: {0}")]
    HostDiscovery(String),

    #[error("Signal handling error: {0}")]
    Signal(String),

    #[error("Informer caches did not sync: {0}")]
    CacheSync(String),

    #[error("Route controller failed: {0}")]
    ControllerFailure(String),

    #[error("Route controller stopped")]
    ControllerStopped,

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl RouteAgentError {
    pub fn stage(&self) -> &'static str {
        match self {
            RouteAgentError::Configuration(_) => "configuration",
            RouteAgentError::Connectivity(_) | RouteAgentError::Kube(_) => "client",
            RouteAgentError::HostDiscovery(_) => "host-discovery",
            RouteAgentError::Signal(_) => "signals",
            RouteAgentError::CacheSync(_) => "cache-sync",
            RouteAgentError::ControllerFailure(_) | RouteAgentError::ControllerStopped => {
                "controller"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RouteAgentError>;

use std::any::Any;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::{ApiClients, ClientOptions};
use crate::config::RuntimeConfig;
use crate::controller::{Controller, RouteController};
use crate::error::{Result, RouteAgentError};
use crate::netif;
use crate::shutdown::ShutdownSupervisor;
use crate::watch::{self, WatchConfiguration};

/// Owns the one background task running the route controller.
pub struct ControllerSupervisor {
    handle: JoinHandle<Result<()>>,
}

impl ControllerSupervisor {
    pub fn launch<C>(controller: C, shutdown: CancellationToken) -> Self
    where
        C: Controller + 'static,
    {
        info!("Launching route controller");
        let handle = tokio::spawn(async move { controller.run(shutdown).await });
        Self { handle }
    }

    /// Blocks until the controller task completes. Any completion is fatal,
    /// so this never yields success.
    pub async fn wait(self) -> RouteAgentError {
        match self.handle.await {
            Ok(Ok(())) => RouteAgentError::ControllerStopped,
            Ok(Err(e @ RouteAgentError::ControllerFailure(_))) => e,
            Ok(Err(e)) => RouteAgentError::ControllerFailure(e.to_string()),
            Err(e) if e.is_panic() => RouteAgentError::ControllerFailure(format!(
                "controller panicked: {}",
                panic_message(e.into_panic())
            )),
            Err(e) => RouteAgentError::ControllerFailure(format!("controller task failed: {}", e)),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Composes the watches, launches the controller built by `build` and
/// waits for it. Interface discovery happens before any watch starts.
pub async fn run_agent<D, B, C>(
    config: &RuntimeConfig,
    clients: &ApiClients,
    shutdown: CancellationToken,
    discover_interface: D,
    build: B,
) -> RouteAgentError
where
    D: FnOnce() -> Result<String>,
    B: FnOnce(&RuntimeConfig, &str, WatchConfiguration) -> C,
    C: Controller + 'static,
{
    match start_agent(config, clients, shutdown, discover_interface, build).await {
        Ok(supervisor) => supervisor.wait().await,
        Err(e) => e,
    }
}

async fn start_agent<D, B, C>(
    config: &RuntimeConfig,
    clients: &ApiClients,
    shutdown: CancellationToken,
    discover_interface: D,
    build: B,
) -> Result<ControllerSupervisor>
where
    D: FnOnce() -> Result<String>,
    B: FnOnce(&RuntimeConfig, &str, WatchConfiguration) -> C,
    C: Controller + 'static,
{
    let (mut factories, watches) =
        watch::compose(clients, &config.namespace, config.resync_interval());

    let default_interface = discover_interface().map_err(|e| match e {
        RouteAgentError::HostDiscovery(_) => e,
        other => RouteAgentError::HostDiscovery(other.to_string()),
    })?;
    info!("Using default gateway interface {}", default_interface);

    let controller = build(config, &default_interface, watches);

    factories.start(&shutdown);
    factories.wait_for_cache_sync(&shutdown).await?;
    info!("Informer caches synced");

    Ok(ControllerSupervisor::launch(controller, shutdown))
}

/// Everything after configuration: signals, clients, watches, controller.
/// Returns only when the agent has to die.
pub async fn run(options: &ClientOptions, config: &RuntimeConfig) -> RouteAgentError {
    let signals = match ShutdownSupervisor::install() {
        Ok(signals) => signals,
        Err(e) => return e,
    };

    let clients = match ApiClients::new(options).await {
        Ok(clients) => clients,
        Err(e) => return e,
    };

    let outcome = run_agent(
        config,
        &clients,
        signals.token(),
        netif::default_gateway_interface,
        |config, default_interface, watches| {
            RouteController::new(
                &config.cluster_id,
                config.cluster_cidr.clone(),
                config.service_cidr.clone(),
                &config.namespace,
                default_interface,
                watches,
            )
        },
    )
    .await;

    if let RouteAgentError::ControllerStopped = outcome {
        error!("All controllers stopped or exited. Stopping main loop");
    }
    outcome
}

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use submariner_route_agent::{run, Cli, RouteAgentError, RuntimeConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", path.display());
    }

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => return fatal(e),
    };

    info!("Starting submariner-route-agent");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Cluster {} namespace {} resync interval {:?}",
        config.cluster_id,
        config.namespace,
        config.resync_interval()
    );

    let outcome = run(&cli.client_options(), &config).await;
    fatal(outcome)
}

fn fatal(err: RouteAgentError) -> ExitCode {
    error!(stage = err.stage(), "{}", err);
    ExitCode::FAILURE
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,submariner_route_agent=debug,kube=info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

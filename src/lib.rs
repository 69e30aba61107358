pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod informer;
pub mod netif;
pub mod shutdown;
pub mod supervisor;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use cli::Cli;
pub use client::{ApiClients, ClientOptions};
pub use config::RuntimeConfig;
pub use controller::{Controller, RouteController};
pub use error::{Result, RouteAgentError};
pub use supervisor::{run, ControllerSupervisor};
pub use watch::{WatchConfiguration, ROUTE_AGENT_SELECTOR};

use std::path::PathBuf;

use clap::Parser;

use crate::client::ClientOptions;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "submariner-route-agent", version, about)]
pub struct Cli {
    /// Path to a kubeconfig. Only required if out-of-cluster.
    #[arg(long, default_value = "")]
    pub kubeconfig: String,

    /// The address of the Kubernetes API server. Overrides any value in kubeconfig.
    /// Only required if out-of-cluster.
    #[arg(long, default_value = "")]
    pub master: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            kubeconfig: non_empty(&self.kubeconfig).map(PathBuf::from),
            master: non_empty(&self.master).map(str::to_string),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{Result, RouteAgentError};

const FORCED_EXIT_CODE: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalDisposition {
    Graceful,
    Forced,
}

/// Turns termination signals into a single cancellation: the first one
/// cancels the token, any later one demands an immediate exit.
#[derive(Clone, Debug)]
pub struct ShutdownSupervisor {
    token: CancellationToken,
    received: Arc<AtomicUsize>,
}

impl ShutdownSupervisor {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            received: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registers SIGTERM and SIGINT and spawns the listener. Must be called
    /// once, from inside the runtime.
    pub fn install() -> Result<Self> {
        let supervisor = Self::new();

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            RouteAgentError::Signal(format!("Failed to setup SIGTERM handler: {}", e))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            RouteAgentError::Signal(format!("Failed to setup SIGINT handler: {}", e))
        })?;

        let listener = supervisor.clone();
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                };
                if listener.on_signal(name) == SignalDisposition::Forced {
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        });

        Ok(supervisor)
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn on_signal(&self, name: &str) -> SignalDisposition {
        let previous = self.received.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            info!("Received {}, shutting down gracefully", name);
            self.token.cancel();
            SignalDisposition::Graceful
        } else {
            error!("Received {} during shutdown, exiting immediately", name);
            SignalDisposition::Forced
        }
    }
}

impl Default for ShutdownSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

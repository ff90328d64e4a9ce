//! Graceful shutdown.
//!
//! Signal handling plus a watch-based shutdown flag for background loops.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Fires the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal shutdown to every [`ShutdownSignal`].
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

/// Shutdown signal receiver.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal. Also returns once the trigger is
    /// dropped.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }

    /// Checks if shutdown has been signaled (non-blocking).
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Create a connected trigger and signal.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, ShutdownSignal { receiver })
}

/// Waits for SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

use std::sync::{Arc, OnceLock};

use eyre::{Result, WrapErr};
use tokio::{signal, sync::broadcast};

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from code, e.g. an engine's `shutdown`
    Requested,
    /// The shutdown channel went away without a reason
    Force,
}

/// One-shot shutdown broadcast.
///
/// The first trigger wins and is delivered to every subscriber and token; later
/// triggers are ignored. Tokens created before or after the trigger both observe it.
pub struct GracefulShutdown {
    /// Broadcast sender for shutdown signals
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    /// Reason of the first trigger, unset while running
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Get a receiver for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Trigger shutdown. Returns false when it was already triggered.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        if self.reason.set(reason).is_err() {
            tracing::debug!("Shutdown already initiated, ignoring {:?}", reason);
            return false;
        }
        tracing::debug!("Shutdown triggered: {:?}", reason);
        // No receivers is fine: tokens also check the stored reason
        let _ = self.shutdown_tx.send(reason);
        true
    }

    /// Listen for SIGINT / SIGTERM and trigger shutdown on the first one
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        let reason = tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for SIGINT")?;
                ShutdownReason::Interrupt
            }
            result = wait_for_sigterm() => {
                result?;
                ShutdownReason::Terminate
            }
        };

        tracing::info!("Received {:?}, initiating graceful shutdown...", reason);
        self.trigger_shutdown(reason);
        Ok(())
    }

    /// Wait until shutdown is triggered (returns immediately if it already was)
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        self.shutdown_token().wait_for_shutdown().await
    }

    /// Create a shutdown token that can be used to cancel operations
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.subscribe(),
            reason: self.reason.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
    Ok(())
}

/// A token that can be used to check for shutdown signals
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            reason: self.reason.clone(),
        }
    }
}

impl ShutdownToken {
    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Non-blocking check
    pub fn try_shutdown(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        if let Some(reason) = self.try_shutdown() {
            return reason;
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => self.try_shutdown().unwrap_or(ShutdownReason::Force),
        }
    }
}

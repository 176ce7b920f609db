//! Listener bookkeeping shared by the engines.
//!
//! An engine owns at most one [`ActiveListener`]: the bound address, the task serving
//! it and two switches. `shutdown` asks the task to stop accepting and drain, `abort`
//! tells in-flight requests to give up once the drain timeout passed. Engines whose
//! connections outlive the serve task must watch `abort` themselves. The socket lives
//! inside the task and is closed when draining starts.
use std::{
    net::SocketAddr,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{net::TcpListener, task::JoinHandle, time::timeout};

use crate::{
    config::ServerSettings,
    ports::{ServerPortError, ServerPortResult},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
};

/// Bind a TCP listener at the settings' address and port.
pub(crate) async fn bind(settings: &ServerSettings) -> ServerPortResult<TcpListener> {
    let address = SocketAddr::new(settings.bind_address, settings.bind_port);
    TcpListener::bind(address)
        .await
        .map_err(|source| ServerPortError::Bind { address, source })
}

pub(crate) struct ActiveListener {
    pub local_addr: SocketAddr,
    pub shutdown: GracefulShutdown,
    pub abort: GracefulShutdown,
    pub task: JoinHandle<()>,
    pub drain_timeout: Duration,
}

#[derive(Default)]
pub(crate) struct ListenerSlot {
    active: Mutex<Option<ActiveListener>>,
}

impl ListenerSlot {
    /// Fail with `AlreadyStarted` while a listener is serving. A listener whose task
    /// already ended on its own is discarded.
    pub fn ensure_vacant(&self) -> ServerPortResult<()> {
        let mut active = self.lock();
        match active.as_ref() {
            Some(listener) if !listener.task.is_finished() => Err(ServerPortError::AlreadyStarted),
            _ => {
                *active = None;
                Ok(())
            }
        }
    }

    pub fn install(&self, listener: ActiveListener) {
        *self.lock() = Some(listener);
    }

    /// Whether the serving task is alive right now
    pub fn is_serving(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|listener| !listener.task.is_finished())
    }

    pub fn local_addr(&self) -> ServerPortResult<SocketAddr> {
        self.lock()
            .as_ref()
            .filter(|listener| !listener.task.is_finished())
            .map(|listener| listener.local_addr)
            .ok_or(ServerPortError::NotStarted)
    }

    /// Signal the serving task, wait for it to drain, abort it and its in-flight
    /// requests past the drain timeout.
    ///
    /// Returns once the task is gone and the socket released. Stopping an empty slot
    /// is a no-op.
    pub async fn stop(&self, engine: &str) -> ServerPortResult<()> {
        let Some(listener) = self.lock().take() else {
            return Ok(());
        };
        let ActiveListener {
            local_addr,
            shutdown,
            abort,
            mut task,
            drain_timeout,
        } = listener;

        tracing::debug!(engine, %local_addr, "Stopping listener");
        shutdown.trigger_shutdown(ShutdownReason::Requested);

        match timeout(drain_timeout, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServerPortError::Shutdown(format!(
                "{engine} serve task on {local_addr} failed: {e}"
            ))),
            Err(_) => {
                tracing::warn!(
                    engine,
                    %local_addr,
                    "Connections still open after {:?}, aborting",
                    drain_timeout
                );
                abort.trigger_shutdown(ShutdownReason::Force);
                task.abort();
                let _ = task.await;
                Err(ServerPortError::Shutdown(format!(
                    "{engine} on {local_addr} did not drain within {drain_timeout:?}"
                )))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveListener>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Server lifecycle orchestration.
//!
//! A [`Server`] ties one routing tree, one engine ([`ServerPort`]) and one set of
//! [`ServerSettings`] together and drives them through
//! `Created → Starting → Running → Stopping → Stopped`. The engine owns the socket;
//! the server only owns the lifecycle state. Lifecycle calls on one server are expected
//! to be serialized by the caller, with the exception of `stop`, which may race with
//! the exit hook and is a no-op unless the server is running.
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use thiserror::Error;
use tracing::Instrument;

use crate::{
    adapters::AxumRouter,
    config::{ServerSettings, ValidationError},
    core::{
        diagnostics::StartupReport,
        exit_hooks::{ExitHookHandle, ExitHooks},
    },
    ports::{Router, ServerPort, ServerPortError},
    tracing_setup::server_span,
};

/// Lifecycle states of a [`Server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Error type for server lifecycle operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// The settings were rejected when the server was built
    #[error("Invalid server configuration: {0}")]
    Configuration(#[from] ValidationError),

    /// A lifecycle operation was called from a state that does not allow it
    #[error("Cannot {operation} a server that is {state}")]
    IllegalState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// The runtime port was requested while the server is not running
    #[error("Server is not running")]
    NotRunning,

    /// The engine failed, e.g. the port could not be bound
    #[error("Server engine error: {0}")]
    Engine(#[from] ServerPortError),
}

/// Result type alias for server lifecycle operations
pub type ServerResult<T> = Result<T, ServerError>;

/// An HTTP server: a routing tree served by an interchangeable engine.
///
/// Cheap to clone; clones share the same lifecycle.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use axum::routing::get;
/// use portway::{AxumEngine, Server, config::ServerSettings};
///
/// # #[tokio::main] async fn main() -> eyre::Result<()> {
/// let app = axum::Router::new().route("/ping", get(|| async { "pong" }));
/// let settings = ServerSettings::builder().bind_port(8080).context_path("/api").build()?;
/// let server = Server::from_axum(Arc::new(AxumEngine::new()), settings, app)?;
///
/// server.start().await?;
/// println!("serving on port {}", server.runtime_port()?);
/// server.stop().await;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    adapter: Arc<dyn ServerPort>,
    router: Arc<dyn Router>,
    settings: Arc<ServerSettings>,
    context_router: OnceLock<Arc<dyn Router>>,
    state: Mutex<LifecycleState>,
    exit_hooks: Arc<ExitHooks>,
    exit_hook: Mutex<Option<ExitHookHandle>>,
}

impl Server {
    /// Create a server, validating `settings`.
    pub fn new(
        adapter: Arc<dyn ServerPort>,
        router: Arc<dyn Router>,
        settings: ServerSettings,
    ) -> ServerResult<Self> {
        Self::builder(adapter, router).settings(settings).build()
    }

    /// Create a server whose routing tree is an `axum::Router`.
    pub fn from_axum(
        adapter: Arc<dyn ServerPort>,
        settings: ServerSettings,
        router: axum::Router,
    ) -> ServerResult<Self> {
        Self::new(adapter, Arc::new(AxumRouter::new(router)), settings)
    }

    pub fn builder(adapter: Arc<dyn ServerPort>, router: Arc<dyn Router>) -> ServerBuilder {
        ServerBuilder {
            adapter,
            router,
            settings: ServerSettings::default(),
            exit_hooks: None,
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }

    /// Shared handle on the settings, for engines that outlive a borrow of the server
    pub fn shared_settings(&self) -> Arc<ServerSettings> {
        self.inner.settings.clone()
    }

    /// The router as given at construction
    pub fn router(&self) -> Arc<dyn Router> {
        self.inner.router.clone()
    }

    /// The router mounted under the context path.
    ///
    /// Computed on first access and cached for the lifetime of the server; with an
    /// empty context path this is the router itself.
    pub fn context_router(&self) -> Arc<dyn Router> {
        self.inner
            .context_router
            .get_or_init(|| {
                let context_path = &self.inner.settings.context_path;
                if context_path.is_empty() {
                    self.inner.router.clone()
                } else {
                    self.inner.router.nest(context_path)
                }
            })
            .clone()
    }

    /// Name of the engine running this server
    pub fn port_name(&self) -> &str {
        self.inner.adapter.name()
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// True only while running and while the engine's listener is alive.
    pub fn started(&self) -> bool {
        self.state() == LifecycleState::Running && self.inner.adapter.started()
    }

    /// Port the engine is bound to.
    ///
    /// # Errors
    /// [`ServerError::NotRunning`] when the server is not started: before binding there
    /// is no port to report, in particular for ephemeral (`0`) bind ports.
    pub fn runtime_port(&self) -> ServerResult<u16> {
        if !self.started() {
            return Err(ServerError::NotRunning);
        }
        Ok(self.inner.adapter.runtime_port()?)
    }

    /// Name of the exit hook registered by `start`, derived from the bind address and port.
    pub fn exit_hook_name(&self) -> String {
        let settings = self.settings();
        format!("shutdown-{}-{}", settings.bind_address, settings.bind_port)
    }

    /// Start serving.
    ///
    /// Registers the exit hook, asks the engine to bind and serve, and logs the startup
    /// report. Allowed from `Created`, and from `Stopped` when the engine supports
    /// restarts. When the engine fails the server ends up `Stopped` and the error is
    /// returned; nothing is retried.
    pub async fn start(&self) -> ServerResult<()> {
        self.begin_start()?;
        self.register_exit_hook();

        let settings = self.settings();
        let span = server_span(
            self.port_name(),
            &settings.bind_address.to_string(),
            settings.bind_port,
        );
        tracing::debug!(parent: &span, "Starting server");

        let startup = self.inner.adapter.startup(self).instrument(span.clone()).await;
        if let Err(e) = startup {
            self.unregister_exit_hook();
            self.set_state(LifecycleState::Stopped);
            tracing::error!(parent: &span, error = %e, "Server failed to start");
            return Err(e.into());
        }

        self.set_state(LifecycleState::Running);
        if let Ok(port) = self.inner.adapter.runtime_port() {
            span.record("runtime.port", port);
        }
        span.in_scope(|| self.log_startup_report());
        Ok(())
    }

    /// Stop serving.
    ///
    /// A no-op unless the server is running. Engine failures while releasing resources
    /// are logged and the server still ends up `Stopped`.
    pub async fn stop(&self) {
        {
            let mut state = self.lock_state();
            if *state != LifecycleState::Running {
                tracing::debug!(state = %*state, "Ignoring stop of a server that is not running");
                return;
            }
            *state = LifecycleState::Stopping;
        }

        if let Err(e) = self.inner.adapter.shutdown().await {
            tracing::warn!(
                adapter = self.port_name(),
                error = %e,
                "Server engine did not shut down cleanly"
            );
        }

        self.unregister_exit_hook();
        self.set_state(LifecycleState::Stopped);
        tracing::info!(adapter = self.port_name(), "Server stopped");
    }

    fn begin_start(&self) -> ServerResult<()> {
        let mut state = self.lock_state();
        match *state {
            LifecycleState::Created => {}
            LifecycleState::Stopped if self.inner.adapter.supports_restart() => {}
            current => {
                return Err(ServerError::IllegalState {
                    operation: "start",
                    state: current,
                });
            }
        }
        *state = LifecycleState::Starting;
        Ok(())
    }

    fn register_exit_hook(&self) {
        let server = Arc::downgrade(&self.inner);
        let handle = self.inner.exit_hooks.register(self.exit_hook_name(), move || async move {
            if let Some(inner) = server.upgrade() {
                let server = Server { inner };
                if server.state() == LifecycleState::Running {
                    tracing::info!(hook = %server.exit_hook_name(), "Stopping server on exit");
                    server.stop().await;
                }
            }
        });

        let previous = self.lock_exit_hook().replace(handle);
        if let Some(previous) = previous {
            self.inner.exit_hooks.unregister(&previous);
        }
    }

    fn unregister_exit_hook(&self) {
        let handle = self.lock_exit_hook().take();
        if let Some(handle) = handle {
            self.inner.exit_hooks.unregister(&handle);
        }
    }

    fn log_startup_report(&self) {
        let report = StartupReport::collect(self);
        tracing::info!(
            "Server started\n{}",
            report.render(self.settings().banner.as_deref())
        );
    }

    fn set_state(&self, next: LifecycleState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_exit_hook(&self) -> MutexGuard<'_, Option<ExitHookHandle>> {
        self.inner
            .exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("adapter", &self.port_name())
            .field("state", &self.state())
            .field("settings", self.settings())
            .finish()
    }
}

/// Builder for [`Server`], see [`Server::builder`].
pub struct ServerBuilder {
    adapter: Arc<dyn ServerPort>,
    router: Arc<dyn Router>,
    settings: ServerSettings,
    exit_hooks: Option<Arc<ExitHooks>>,
}

impl ServerBuilder {
    pub fn settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register exit hooks in `exit_hooks` instead of [`ExitHooks::global`].
    pub fn exit_hooks(mut self, exit_hooks: Arc<ExitHooks>) -> Self {
        self.exit_hooks = Some(exit_hooks);
        self
    }

    pub fn build(self) -> ServerResult<Server> {
        self.settings.validate()?;

        Ok(Server {
            inner: Arc::new(ServerInner {
                adapter: self.adapter,
                router: self.router,
                settings: Arc::new(self.settings),
                context_router: OnceLock::new(),
                state: Mutex::new(LifecycleState::Created),
                exit_hooks: self.exit_hooks.unwrap_or_else(ExitHooks::global),
                exit_hook: Mutex::new(None),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use hyper::{Request, Response, StatusCode};

    use super::*;
    use crate::ports::ServerPortResult;

    /// Engine double that binds nothing and fails on demand.
    #[derive(Default)]
    struct FakeEngine {
        running: AtomicBool,
        fail_startup: bool,
        fail_shutdown: bool,
        restartable: bool,
        startups: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl ServerPort for FakeEngine {
        async fn startup(&self, server: &Server) -> ServerPortResult<()> {
            self.startups.fetch_add(1, Ordering::SeqCst);
            assert_eq!(server.state(), LifecycleState::Starting);
            assert!(!server.started());
            if self.fail_startup {
                return Err(ServerPortError::Io(std::io::Error::from(
                    std::io::ErrorKind::AddrInUse,
                )));
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> ServerPortResult<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            if self.fail_shutdown {
                return Err(ServerPortError::Shutdown("socket stuck".to_string()));
            }
            Ok(())
        }

        fn started(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn runtime_port(&self) -> ServerPortResult<u16> {
            if self.started() {
                Ok(41234)
            } else {
                Err(ServerPortError::NotStarted)
            }
        }

        fn name(&self) -> &str {
            "FakeEngine"
        }

        fn supports_restart(&self) -> bool {
            self.restartable
        }
    }

    /// Router double counting `nest` calls.
    #[derive(Default)]
    struct CountingRouter {
        nests: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Router for CountingRouter {
        fn nest(&self, _prefix: &str) -> Arc<dyn Router> {
            self.nests.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingRouter {
                nests: self.nests.clone(),
            })
        }

        async fn route(&self, _req: Request<AxumBody>) -> Response<AxumBody> {
            let mut response = Response::new(AxumBody::empty());
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }

    fn server_with(engine: Arc<FakeEngine>, settings: ServerSettings) -> (Server, Arc<ExitHooks>) {
        let hooks = Arc::new(ExitHooks::new());
        let server = Server::builder(engine, Arc::new(CountingRouter::default()))
            .settings(settings)
            .exit_hooks(hooks.clone())
            .build()
            .unwrap();
        (server, hooks)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let engine = Arc::new(FakeEngine::default());
        let (server, hooks) = server_with(engine.clone(), ServerSettings::default());

        assert_eq!(server.state(), LifecycleState::Created);
        assert!(!server.started());
        assert!(matches!(server.runtime_port(), Err(ServerError::NotRunning)));

        server.start().await.unwrap();
        assert_eq!(server.state(), LifecycleState::Running);
        assert!(server.started());
        assert_eq!(server.runtime_port().unwrap(), 41234);
        assert!(hooks.contains("shutdown-0.0.0.0-0"));

        server.stop().await;
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(!server.started());
        assert!(hooks.is_empty());
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine = Arc::new(FakeEngine::default());
        let (server, _hooks) = server_with(engine.clone(), ServerSettings::default());

        server.stop().await;
        assert_eq!(server.state(), LifecycleState::Created);

        server.start().await.unwrap();
        server.stop().await;
        server.stop().await;
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_startup_leaves_server_stopped() {
        let engine = Arc::new(FakeEngine {
            fail_startup: true,
            ..Default::default()
        });
        let (server, hooks) = server_with(engine.clone(), ServerSettings::default());

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Engine(ServerPortError::Io(_))));
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(!server.started());
        assert!(hooks.is_empty());

        // No restart support: a second attempt is rejected without touching the engine
        let err = server.start().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::IllegalState {
                operation: "start",
                state: LifecycleState::Stopped
            }
        ));
        assert_eq!(engine.startups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let engine = Arc::new(FakeEngine::default());
        let (server, _hooks) = server_with(engine.clone(), ServerSettings::default());

        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::IllegalState {
                state: LifecycleState::Running,
                ..
            })
        ));
        assert_eq!(engine.startups.load(Ordering::SeqCst), 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_restart_when_engine_supports_it() {
        let engine = Arc::new(FakeEngine {
            restartable: true,
            ..Default::default()
        });
        let (server, hooks) = server_with(engine.clone(), ServerSettings::default());

        server.start().await.unwrap();
        server.stop().await;
        server.start().await.unwrap();
        assert!(server.started());
        assert_eq!(hooks.len(), 1);
        server.stop().await;
        assert_eq!(engine.startups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_failure_still_stops() {
        let engine = Arc::new(FakeEngine {
            fail_shutdown: true,
            ..Default::default()
        });
        let (server, _hooks) = server_with(engine, ServerSettings::default());

        server.start().await.unwrap();
        server.stop().await;
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(!server.started());
    }

    #[tokio::test]
    async fn test_exit_hook_stops_running_server() {
        let engine = Arc::new(FakeEngine::default());
        let settings = ServerSettings::builder()
            .bind_address("127.0.0.1".parse().unwrap())
            .bind_port(9000)
            .build()
            .unwrap();
        let (server, hooks) = server_with(engine.clone(), settings);

        server.start().await.unwrap();
        assert_eq!(server.exit_hook_name(), "shutdown-127.0.0.1-9000");
        assert_eq!(hooks.fire("shutdown-127.0.0.1-9000").await, 1);
        assert_eq!(server.state(), LifecycleState::Stopped);

        // The explicit stop that follows is a no-op
        server.stop().await;
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_context_router_is_memoized() {
        let nests = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(CountingRouter {
            nests: nests.clone(),
        });
        let settings = ServerSettings::builder().context_path("/api").build().unwrap();
        let server = Server::builder(Arc::new(FakeEngine::default()), router)
            .settings(settings)
            .exit_hooks(Arc::new(ExitHooks::new()))
            .build()
            .unwrap();

        assert_eq!(nests.load(Ordering::SeqCst), 0);
        let first = server.context_router();
        let second = server.context_router();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(nests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_context_path_is_identity() {
        let nests = Arc::new(AtomicUsize::new(0));
        let router: Arc<dyn Router> = Arc::new(CountingRouter {
            nests: nests.clone(),
        });
        let server = Server::builder(Arc::new(FakeEngine::default()), router.clone())
            .exit_hooks(Arc::new(ExitHooks::new()))
            .build()
            .unwrap();

        assert!(Arc::ptr_eq(&server.context_router(), &router));
        assert_eq!(nests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_settings_rejected_at_construction() {
        let settings = ServerSettings {
            context_path: "api/".to_string(),
            ..Default::default()
        };
        let result = Server::new(
            Arc::new(FakeEngine::default()),
            Arc::new(CountingRouter::default()),
            settings,
        );
        assert!(matches!(
            result,
            Err(ServerError::Configuration(
                ValidationError::InvalidContextPath { .. }
            ))
        ));
    }
}

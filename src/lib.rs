//! Portway - an HTTP server front-end with interchangeable engines.
//!
//! An application assembles its routing tree once and runs it under any engine that
//! implements [`ServerPort`]. The crate follows a **hexagonal architecture**: `ports` holds
//! the capabilities (`ServerPort`, `Router`), `adapters` the engines built on axum and
//! hyper, and `core` the server lifecycle that ties them together.
//!
//! # Features
//! - Lifecycle state machine (`Created → Starting → Running → Stopping → Stopped`)
//! - Context-path mounting of the routing tree
//! - Engines on `axum::serve` and on a hand-written hyper accept loop
//! - HTTP/1.1, HTTP/2 and TLS (rustls) listeners
//! - Ephemeral port binding with runtime port discovery
//! - Exit hooks stopping running servers on process shutdown
//! - Startup report with host, memory and binding diagnostics via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::routing::get;
//! use portway::{HyperEngine, Server, config::ServerSettings};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let app = axum::Router::new().route("/users", get(|| async { "[]" }));
//! let settings = ServerSettings::builder().context_path("/api").build()?;
//! let server = Server::from_axum(Arc::new(HyperEngine::new()), settings, app)?;
//!
//! server.start().await?;
//! // GET http://localhost:{port}/api/users
//! let port = server.runtime_port()?;
//! # let _ = port;
//! server.stop().await;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Library APIs return domain error types ([`ServerError`], [`ServerPortError`],
//! [`config::ValidationError`]); the configuration loader and the binary use `eyre`.
pub mod adapters;
pub mod config;
pub mod core;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub use crate::{
    adapters::{AxumEngine, AxumRouter, HyperEngine},
    config::{Protocol, ServerSettings},
    core::{ExitHooks, LifecycleState, Server, ServerError, ServerResult},
    ports::{Router, ServerPort, ServerPortError},
    utils::GracefulShutdown,
};

//! Engine serving through `axum::serve`.
use std::{fmt::Debug, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::{body::Body as AxumBody, response::IntoResponse, serve::Listener};
use futures_util::{Stream, StreamExt};
use hyper::Request;
use tls_listener::TlsListener;
use hyper::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        listener::{self, ActiveListener, ListenerSlot},
        tls,
    },
    core::Server,
    ports::{Router, ServerPort, ServerPortResult},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownToken},
};

/// [`ServerPort`] running the context router with `axum::serve`.
///
/// HTTP/1.1 and HTTP/2 are served on the same listener. Secure protocols terminate TLS
/// in front of axum. `shutdown` stops accepting at once and waits up to the settings'
/// shutdown timeout for open connections. Past that, requests still in their handler
/// are cancelled and answered with `503 Service Unavailable`, after which their
/// connections close. Response bodies already streaming and upgraded connections are
/// not cut.
#[derive(Default)]
pub struct AxumEngine {
    listener: ListenerSlot,
}

impl AxumEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerPort for AxumEngine {
    async fn startup(&self, server: &Server) -> ServerPortResult<()> {
        self.listener.ensure_vacant()?;

        let settings = server.settings();
        let acceptor = tls::build_acceptor(settings)?;
        let tcp = listener::bind(settings).await?;
        let local_addr = tcp.local_addr()?;

        let shutdown = GracefulShutdown::new();
        let abort = GracefulShutdown::new();
        let app = dispatch_app(server.context_router(), abort.shutdown_token());
        let token = shutdown.shutdown_token();

        let task = match acceptor {
            None => tokio::spawn(serve(tcp, app, token)),
            Some(acceptor) => {
                let stream = TlsListener::new(acceptor, tcp);
                tokio::spawn(serve(StreamListener { stream, local_addr }, app, token))
            }
        };

        self.listener.install(ActiveListener {
            local_addr,
            shutdown,
            abort,
            task,
            drain_timeout: settings.shutdown_timeout(),
        });

        tracing::info!(
            %local_addr,
            protocol = %settings.protocol,
            "Axum engine listening"
        );
        Ok(())
    }

    async fn shutdown(&self) -> ServerPortResult<()> {
        self.listener.stop(self.name()).await
    }

    fn started(&self) -> bool {
        self.listener.is_serving()
    }

    fn runtime_port(&self) -> ServerPortResult<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    fn name(&self) -> &str {
        "AxumEngine"
    }

    fn supports_restart(&self) -> bool {
        true
    }
}

/// Axum application handing every request to `router`.
///
/// `axum::serve` runs connections on tasks of its own, so aborting the serve task does
/// not reach them; each request races `abort` instead.
fn dispatch_app(router: Arc<dyn Router>, abort: ShutdownToken) -> axum::Router {
    axum::Router::new()
        .fallback(move |req: Request<AxumBody>| {
            let router = router.clone();
            let mut abort = abort.clone();
            async move {
                tokio::select! {
                    response = router.route(req) => response,
                    _ = abort.wait_for_shutdown() => {
                        tracing::debug!("Request cancelled by engine shutdown");
                        StatusCode::SERVICE_UNAVAILABLE.into_response()
                    }
                }
            }
        })
        .layer(TraceLayer::new_for_http())
}

async fn serve<L>(listener: L, app: axum::Router, mut token: ShutdownToken)
where
    L: Listener,
    L::Addr: Debug,
{
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            token.wait_for_shutdown().await;
        })
        .await;

    match result {
        Ok(()) => tracing::debug!("Axum engine serve loop finished"),
        Err(e) => tracing::error!(error = %e, "Axum engine serve loop failed"),
    }
}

/// Adapts a stream of accepted connections (here: completed TLS handshakes) to
/// axum's [`Listener`].
struct StreamListener<S> {
    stream: S,
    local_addr: SocketAddr,
}

impl<S, I, E> Listener for StreamListener<S>
where
    S: Stream<Item = Result<(I, SocketAddr), E>> + Unpin + Send + 'static,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    type Io = I;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.stream.next().await {
                Some(Ok((io, addr))) => return (io, addr),
                Some(Err(e)) => tracing::debug!("TLS accept error: {}", e),
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

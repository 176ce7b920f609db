//! Engine driving hyper connections directly.
//!
//! Owns the accept loop: every connection is served on its own task with
//! `hyper_util`'s auto builder, which picks HTTP/1.1 or HTTP/2 per connection. On
//! shutdown the listener is closed first, then each connection is asked to finish its
//! in-flight requests. Connections are owned by the accept loop, so they are dropped
//! with it when the drain timeout runs out.
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time::timeout,
};
use tokio_rustls::TlsAcceptor;

use crate::{
    adapters::{
        listener::{self, ActiveListener, ListenerSlot},
        tls,
    },
    core::Server,
    ports::{Router, ServerPort, ServerPortResult},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownToken},
};

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ServerPort`] with a hand-written accept loop over hyper.
#[derive(Default)]
pub struct HyperEngine {
    listener: ListenerSlot,
}

impl HyperEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerPort for HyperEngine {
    async fn startup(&self, server: &Server) -> ServerPortResult<()> {
        self.listener.ensure_vacant()?;

        let settings = server.settings();
        let acceptor = tls::build_acceptor(settings)?;
        let tcp = listener::bind(settings).await?;
        let local_addr = tcp.local_addr()?;

        let shutdown = GracefulShutdown::new();
        let abort = GracefulShutdown::new();
        let task = tokio::spawn(accept_loop(
            tcp,
            acceptor,
            server.context_router(),
            shutdown.shutdown_token(),
            abort.shutdown_token(),
        ));

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
            "Hyper engine listening"
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
        "HyperEngine"
    }

    fn supports_restart(&self) -> bool {
        true
    }
}

async fn accept_loop(
    tcp: TcpListener,
    acceptor: Option<TlsAcceptor>,
    router: Arc<dyn Router>,
    token: ShutdownToken,
    mut abort: ShutdownToken,
) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let mut connections = JoinSet::new();
    let mut stop = token.clone();

    loop {
        tokio::select! {
            accepted = tcp.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    connections.spawn(handle_connection(
                        builder.clone(),
                        stream,
                        remote_addr,
                        acceptor.clone(),
                        router.clone(),
                        token.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            reason = stop.wait_for_shutdown() => {
                tracing::debug!(?reason, "Hyper engine stops accepting");
                break;
            }
        }
    }

    // Release the port before draining
    drop(tcp);

    let open = connections.len();
    if open > 0 {
        tracing::debug!("Draining {} open connections", open);
    }
    tokio::select! {
        _ = async { while connections.join_next().await.is_some() {} } => {}
        _ = abort.wait_for_shutdown() => {
            tracing::debug!("Aborting {} connections", connections.len());
            connections.abort_all();
        }
    }
}

async fn handle_connection(
    builder: auto::Builder<TokioExecutor>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    router: Arc<dyn Router>,
    token: ShutdownToken,
) {
    let Some(acceptor) = acceptor else {
        serve_io(&builder, TokioIo::new(stream), remote_addr, router, token).await;
        return;
    };

    match timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(tls_stream)) => {
            serve_io(&builder, TokioIo::new(tls_stream), remote_addr, router, token).await
        }
        Ok(Err(e)) => tracing::debug!(%remote_addr, error = %e, "TLS handshake failed"),
        Err(_) => tracing::debug!(%remote_addr, "TLS handshake timed out"),
    }
}

async fn serve_io<I>(
    builder: &auto::Builder<TokioExecutor>,
    io: TokioIo<I>,
    remote_addr: SocketAddr,
    router: Arc<dyn Router>,
    mut token: ShutdownToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let router = router.clone();
        async move { Ok::<_, Infallible>(router.route(req.map(AxumBody::new)).await) }
    });

    let conn = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = token.wait_for_shutdown() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(%remote_addr, error = %e, "Connection closed with error");
    }
}

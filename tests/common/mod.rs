#![allow(dead_code)]

use std::{
    collections::HashSet,
    io::Write,
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{extract::Path, routing::get};
use portway::{
    AxumEngine, HyperEngine, Server, ServerPort, ServerPortError,
    config::{Protocol, ServerSettings},
    ports::ServerPortResult,
};
use tempfile::TempDir;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Both real engines, so every network scenario runs against each of them.
pub fn engines() -> Vec<Arc<dyn ServerPort>> {
    vec![Arc::new(AxumEngine::new()), Arc::new(HyperEngine::new())]
}

pub fn app() -> axum::Router {
    axum::Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/users", get(|| async { "[\"ada\",\"grace\"]" }))
        .route(
            "/users/{id}",
            get(|Path(id): Path<u32>| async move { format!("user {id}") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(400)).await;
                "done"
            }),
        )
        .route(
            "/stuck",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                "finished"
            }),
        )
}

/// Settings bound to loopback on an ephemeral port
pub fn local_settings() -> ServerSettings {
    ServerSettings::builder()
        .bind_address(LOCALHOST)
        .bind_port(0)
        .build()
        .unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap()
}

pub fn url(server: &Server, path: &str) -> String {
    format!(
        "{}://127.0.0.1:{}{}",
        server.settings().protocol.scheme(),
        server.runtime_port().unwrap(),
        path
    )
}

/// Self-signed certificate and key for `localhost`, written as PEM files.
pub struct SelfSigned {
    dir: TempDir,
}

impl SelfSigned {
    pub fn generate() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("cert.pem"))
            .unwrap()
            .write_all(cert.cert.pem().as_bytes())
            .unwrap();
        std::fs::File::create(dir.path().join("key.pem"))
            .unwrap()
            .write_all(cert.signing_key.serialize_pem().as_bytes())
            .unwrap();
        Self { dir }
    }

    pub fn settings(&self, protocol: Protocol) -> ServerSettings {
        ServerSettings::builder()
            .bind_address(LOCALHOST)
            .protocol(protocol)
            .tls(
                self.dir.path().join("cert.pem"),
                self.dir.path().join("key.pem"),
            )
            .build()
            .unwrap()
    }
}

/// Engine double that shares a table of "bound" address/port pairs with its siblings
/// and refuses to bind a pair twice, like the OS would.
pub struct FaultyEngine {
    bound: Arc<Mutex<HashSet<(IpAddr, u16)>>>,
    pair: Mutex<Option<(IpAddr, u16)>>,
    running: AtomicBool,
}

impl FaultyEngine {
    /// Engines that see each other's bindings
    pub fn siblings(count: usize) -> Vec<Arc<FaultyEngine>> {
        let bound = Arc::new(Mutex::new(HashSet::new()));
        (0..count)
            .map(|_| {
                Arc::new(FaultyEngine {
                    bound: bound.clone(),
                    pair: Mutex::new(None),
                    running: AtomicBool::new(false),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ServerPort for FaultyEngine {
    async fn startup(&self, server: &Server) -> ServerPortResult<()> {
        let settings = server.settings();
        let pair = (settings.bind_address, settings.bind_port);
        if !self.bound.lock().unwrap().insert(pair) {
            return Err(ServerPortError::Bind {
                address: pair.into(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
            });
        }
        *self.pair.lock().unwrap() = Some(pair);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> ServerPortResult<()> {
        if let Some(pair) = self.pair.lock().unwrap().take() {
            self.bound.lock().unwrap().remove(&pair);
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn started(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn runtime_port(&self) -> ServerPortResult<u16> {
        self.pair
            .lock()
            .unwrap()
            .map(|(_, port)| port)
            .ok_or(ServerPortError::NotStarted)
    }

    fn name(&self) -> &str {
        "FaultyEngine"
    }
}

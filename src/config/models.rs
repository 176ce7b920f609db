//! Configuration data structures for Portway.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! serde‑friendly and include defaults so that minimal configs remain concise. In code,
//! prefer [`ServerSettings::builder`], which validates before handing out a value.
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::config::validation::{SettingsValidator, ValidationResult};

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Application protocol spoken by the listener.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Cleartext HTTP/1.1 (HTTP/2 with prior knowledge is accepted as well)
    #[default]
    Http,
    /// HTTP/1.1 over TLS
    Https,
    /// HTTP/2 over TLS, negotiated through ALPN with HTTP/1.1 fallback
    Http2,
}

impl Protocol {
    /// Whether the protocol requires a TLS certificate.
    pub fn is_secure(self) -> bool {
        !matches!(self, Protocol::Http)
    }

    /// URL scheme clients use to reach a listener speaking this protocol.
    pub fn scheme(self) -> &'static str {
        if self.is_secure() { "https" } else { "http" }
    }

    /// ALPN identifiers offered during the TLS handshake.
    pub fn alpn_protocols(self) -> Vec<Vec<u8>> {
        match self {
            Protocol::Http => Vec::new(),
            Protocol::Https => vec![b"http/1.1".to_vec()],
            Protocol::Http2 => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Http2 => "HTTP/2",
        };
        f.write_str(name)
    }
}

/// TLS material for the secure protocols.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM encoded certificate chain
    pub cert_path: PathBuf,
    /// PEM encoded private key (PKCS#8, PKCS#1 or SEC1)
    pub key_path: PathBuf,
}

/// Immutable settings of a single server.
///
/// Shared by reference between the [`Server`](crate::core::Server) and the engine
/// running it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the listener binds to, the unspecified address means every interface
    pub bind_address: IpAddr,
    /// Port the listener binds to, `0` lets the OS pick an ephemeral port
    pub bind_port: u16,
    pub protocol: Protocol,
    /// URL prefix under which the whole routing tree is mounted, empty for the root
    pub context_path: String,
    /// Text printed above the startup report instead of the built-in banner
    pub banner: Option<String>,
    pub tls: Option<TlsSettings>,
    /// How long `shutdown` waits for in-flight connections before aborting them
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: 0,
            protocol: Protocol::default(),
            context_path: String::new(),
            banner: None,
            tls: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ServerSettings {
    /// Start building validated settings from the defaults.
    pub fn builder() -> ServerSettingsBuilder {
        ServerSettingsBuilder::default()
    }

    /// Check the settings, see [`SettingsValidator`].
    pub fn validate(&self) -> ValidationResult<()> {
        SettingsValidator::validate(self)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Builder for [`ServerSettings`]; `build` rejects invalid combinations.
#[derive(Debug, Clone, Default)]
pub struct ServerSettingsBuilder {
    settings: ServerSettings,
}

impl ServerSettingsBuilder {
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.settings.bind_address = address;
        self
    }

    pub fn bind_port(mut self, port: u16) -> Self {
        self.settings.bind_port = port;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.settings.protocol = protocol;
        self
    }

    pub fn context_path(mut self, path: impl Into<String>) -> Self {
        self.settings.context_path = path.into();
        self
    }

    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.settings.banner = Some(banner.into());
        self
    }

    pub fn tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.settings.tls = Some(TlsSettings {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.settings.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    pub fn build(self) -> ValidationResult<ServerSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

/// Server engine selected when the binary composes its server.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// `axum::serve` based engine
    #[default]
    Axum,
    /// Accept loop over hyper-util's auto connection builder
    Hyper,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Axum => f.write_str("axum"),
            EngineKind::Hyper => f.write_str("hyper"),
        }
    }
}

/// Logging configuration for the binary.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top level configuration file of the `portway` binary.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineKind,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

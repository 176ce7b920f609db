//! Startup report logged once a server reaches the running state.
//!
//! Every field is collected on a best-effort basis: anything the platform refuses to
//! tell is rendered as `unknown` rather than failing the start.
use std::{
    env, fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use sysinfo::System;

use crate::{config::Protocol, core::Server};

/// Banner printed above the report when the settings carry none.
pub const DEFAULT_BANNER: &str = r"
 ____   ___  ____ _______        ___ __   __
|  _ \ / _ \|  _ \_   _\ \      / / \\ \ / /
| |_) | | | | |_) || |  \ \ /\ / / _ \\ V /
|  __/| |_| |  _ < | |   \ V  V / ___ \| |
|_|    \___/|_| \_\|_|    \_/\_/_/   \_\_|
";

const UNKNOWN: &str = "unknown";

/// Address probed to learn which local interface faces the outside. Connecting a UDP
/// socket sends nothing.
const OUTWARD_PROBE: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

/// Snapshot of the process and host taken right after a successful start.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub adapter: String,
    pub hostname: String,
    pub cpu_count: usize,
    pub virtual_memory_kb: Option<u64>,
    pub resident_memory_kb: Option<u64>,
    pub platform: String,
    pub version: String,
    pub locale: String,
    pub timezone: String,
    pub charset: String,
    /// Whole seconds since the process started
    pub uptime: Option<Duration>,
    pub binding: String,
    pub protocol: Protocol,
}

impl StartupReport {
    /// Collect the report for a server; meant to be called once it is running.
    pub fn collect(server: &Server) -> Self {
        let settings = server.settings();
        let memory = memory_stats::memory_stats();
        let (locale, charset) = parse_locale(locale_from_env().as_deref());

        let host = advertised_host(settings.bind_address);
        let binding = match server.runtime_port() {
            Ok(port) => binding_url(settings.protocol, &host, port),
            Err(_) => format!("{}://{host} (not bound)", settings.protocol.scheme()),
        };

        Self {
            adapter: server.port_name().to_string(),
            hostname: System::host_name().unwrap_or_else(|| UNKNOWN.to_string()),
            cpu_count: num_cpus::get(),
            virtual_memory_kb: memory.as_ref().map(|m| m.virtual_mem as u64 / 1024),
            resident_memory_kb: memory.as_ref().map(|m| m.physical_mem as u64 / 1024),
            platform: format!(
                "{} [{}]",
                System::long_os_version().unwrap_or_else(|| env::consts::OS.to_string()),
                env::consts::ARCH
            ),
            version: env!("CARGO_PKG_VERSION").to_string(),
            locale,
            timezone: timezone(),
            charset,
            uptime: process_uptime(),
            binding,
            protocol: settings.protocol,
        }
    }

    /// Render the report prefixed with `banner`, or with [`DEFAULT_BANNER`].
    pub fn render(&self, banner: Option<&str>) -> String {
        let banner = banner.unwrap_or(DEFAULT_BANNER);
        format!("{}\n{self}", banner.trim_end_matches('\n'))
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uptime = self
            .uptime
            .map(|d| format!("{} s", d.as_secs()))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let http2 = if self.protocol == Protocol::Http2 {
            " (HTTP/2)"
        } else {
            ""
        };

        writeln!(f)?;
        writeln!(f, "Server Adapter: {}", self.adapter)?;
        writeln!(f)?;
        writeln!(
            f,
            "Running in '{}' with {} CPUs {} KB",
            self.hostname,
            self.cpu_count,
            format_kb(self.virtual_memory_kb)
        )?;
        writeln!(f, "Portway {} on {}", self.version, self.platform)?;
        writeln!(
            f,
            "Locale {} Timezone {} Charset {}",
            self.locale, self.timezone, self.charset
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "Started in {uptime} using {} KB",
            format_kb(self.resident_memory_kb)
        )?;
        write!(f, "Served at {}{http2}", self.binding)
    }
}

/// URL clients use to reach a listener, e.g. `https://10.0.0.4:8443`.
pub fn binding_url(protocol: Protocol, host: &str, port: u16) -> String {
    let host = match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
        _ => host.to_string(),
    };
    format!("{}://{host}:{port}", protocol.scheme())
}

/// Host name to advertise for a bind address.
///
/// The wildcard address is replaced by the address of the interface facing the
/// outside (loopback when there is none), loopback becomes `localhost`. Any other
/// address is named by its canonical host name when there is one, see
/// [`canonical_host_name`].
pub fn advertised_host(address: IpAddr) -> String {
    if address.is_unspecified() {
        return outward_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "localhost".to_string());
    }
    if address.is_loopback() {
        return "localhost".to_string();
    }
    canonical_host_name(address).unwrap_or_else(|| address.to_string())
}

/// The machine's host name, provided it resolves back to `address`.
///
/// Resolution goes through the system resolver (`/etc/hosts` first on most systems).
pub fn canonical_host_name(address: IpAddr) -> Option<String> {
    let host = System::host_name()?;
    let mut resolved = (host.as_str(), 0).to_socket_addrs().ok()?;
    resolved
        .any(|candidate| candidate.ip() == address)
        .then_some(host)
}

fn outward_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(OUTWARD_PROBE).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

fn locale_from_env() -> Option<String> {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .into_iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.is_empty())
}

/// Split a POSIX locale (`en_US.UTF-8@euro`) into locale and charset.
fn parse_locale(raw: Option<&str>) -> (String, String) {
    let raw = raw.unwrap_or("C");
    let without_modifier = raw.split('@').next().unwrap_or(raw);
    match without_modifier.split_once('.') {
        Some((locale, charset)) if !charset.is_empty() => {
            (locale.to_string(), charset.to_string())
        }
        Some((locale, _)) => (locale.to_string(), "UTF-8".to_string()),
        None => (without_modifier.to_string(), "UTF-8".to_string()),
    }
}

fn timezone() -> String {
    let offset = chrono::Local::now().format("%:z").to_string();
    match env::var("TZ") {
        Ok(tz) if !tz.is_empty() => format!("{tz} ({offset})"),
        _ => format!("UTC{offset}"),
    }
}

fn process_uptime() -> Option<Duration> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|process| Duration::from_secs(process.run_time()))
}

/// Thousands separated, like `1,048,576`.
fn format_kb(kb: Option<u64>) -> String {
    let Some(kb) = kb else {
        return UNKNOWN.to_string();
    };
    let digits = kb.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

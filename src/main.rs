use std::{path::Path, sync::Arc};

use axum::{extract::Path as UrlPath, routing::get};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portway::{
    AxumEngine, ExitHooks, HyperEngine, Server, ServerPort,
    config::{
        AppConfig, EngineKind, SettingsValidator,
        loader::{load_config, load_config_or_default},
    },
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(flatten)]
    serve: ServeArgs,
}

#[derive(clap::Args, Debug, Clone)]
struct ServeArgs {
    /// Configuration file to use
    #[clap(short, long, default_value = "portway.toml")]
    config: String,

    /// Engine running the server, overrides the configuration file
    #[clap(short, long, value_enum)]
    engine: Option<EngineKind>,

    /// Bind port, overrides the configuration file (0 picks an ephemeral port)
    #[clap(short, long)]
    port: Option<u16>,

    /// Context path the routes are mounted under, overrides the configuration file
    #[clap(long)]
    context_path: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "portway.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "portway.toml")]
        config: String,
    },
    /// Start the demo server (default)
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config),
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve(serve)) => serve_command(serve).await,
        None => serve_command(args.serve).await,
    }
}

async fn serve_command(args: ServeArgs) -> Result<()> {
    let mut config = load_config_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    apply_overrides(&mut config, &args);

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    SettingsValidator::validate_app(&config).context("Invalid configuration")?;

    let engine: Arc<dyn ServerPort> = match config.engine {
        EngineKind::Axum => Arc::new(AxumEngine::new()),
        EngineKind::Hyper => Arc::new(HyperEngine::new()),
    };
    tracing::info!(engine = %config.engine, "Using {} engine", engine.name());

    let server = Server::from_axum(engine, config.server, demo_router())
        .context("Failed to create server")?;
    server.start().await.context("Failed to start server")?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = {
        let graceful_shutdown = graceful_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = graceful_shutdown.run_signal_handler().await {
                tracing::error!("Signal handler error: {}", e);
            }
        })
    };

    let reason = graceful_shutdown.wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received: {:?}", reason);
    signal_handler.abort();

    let hooks = ExitHooks::global().run_all().await;
    tracing::debug!("Ran {} exit hooks", hooks);
    // Already stopped by its exit hook unless the hook was gone
    server.stop().await;

    tracing::info!("Graceful shutdown completed");
    tracing_setup::shutdown_tracing();
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, args: &ServeArgs) {
    if let Some(engine) = args.engine {
        config.engine = engine;
    }
    if let Some(port) = args.port {
        config.server.bind_port = port;
    }
    if let Some(context_path) = &args.context_path {
        config.server.context_path = context_path.clone();
    }
}

fn demo_router() -> axum::Router {
    axum::Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route(
            "/hello/{name}",
            get(|UrlPath(name): UrlPath<String>| async move { format!("Hello, {name}!") }),
        )
}

/// Validate configuration file
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match SettingsValidator::validate_app(&config) {
        Ok(()) => {
            let server = &config.server;
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Engine: {}", config.engine);
            println!("   • Bind: {}:{}", server.bind_address, server.bind_port);
            println!("   • Protocol: {}", server.protocol);
            println!(
                "   • Context Path: {}",
                if server.context_path.is_empty() { "/" } else { &server.context_path }
            );
            println!("   • TLS Configured: {}", server.tls.is_some());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Context paths look like '/api/v1': leading '/', no trailing '/'");
            println!("   • 'https' and 'http2' need a [server.tls] section");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Portway Configuration

# Engine running the server: "axum" or "hyper"
engine = "axum"

[server]
bind_address = "127.0.0.1"
# 0 picks an ephemeral port
bind_port = 8080
# "http", "https" or "http2"
protocol = "http"
# Mount every route under this prefix, empty for the root
context_path = ""
shutdown_timeout_secs = 30
# banner = "my service"

# Required for "https" and "http2"
# [server.tls]
# cert_path = "certs/server.crt"
# key_path = "certs/server.key"

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'portway serve --config {config_path}' to start the server");
    Ok(())
}

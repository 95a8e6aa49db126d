use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use sneak_link::{
    adapters::{HttpClientAdapter, HttpHandler, TracingAuditSink, router},
    config::{GatewayConfig, GatewayConfigValidator, load_config},
    core::{AccessController, ServiceRegistry},
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::{GracefulShutdown, ShutdownReason},
};
use tokio::net::TcpListener;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file; `SNEAK_LINK__*` environment variables override it
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate configuration and print a summary
    Validate,
    /// Write a starter configuration file with a fresh signing key
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(resolve_config_path(args.config.as_deref())).await,
        Commands::Validate => validate_config_command(resolve_config_path(args.config.as_deref())),
        Commands::Init => {
            init_config_command(args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)).await
        }
    }
}

/// An explicit path is used as given; otherwise `config.toml` is picked up
/// when present and the environment alone is used when it is not.
fn resolve_config_path(explicit: Option<&str>) -> Option<&str> {
    match explicit {
        Some(path) => Some(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Some(DEFAULT_CONFIG_PATH),
        None => None,
    }
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config: GatewayConfig = load_config(config_path)
        .with_context(|| format!("Failed to load configuration from {config_path:?}"))?;

    tracing_setup::init_tracing(&config.logging.level, config.logging.json)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(config.backend.timeout()?)
            .context("Failed to create HTTP client adapter")?,
    );
    let audit = Arc::new(TracingAuditSink::with_services(
        config.services.iter().map(|s| s.service_type.clone()),
    ));
    let controller = Arc::new(
        AccessController::from_config(&config, http_client, audit.clone())
            .context("Refusing to start with an invalid configuration")?,
    );

    for service in controller.registry().iter() {
        tracing::info!(
            hostname = %service.hostname,
            service = %service.service_type,
            backend = %service.backend,
            grants_session = service.grants_session,
            "Configured service"
        );
    }

    let graceful_shutdown = Arc::new(GracefulShutdown::new(config.shutdown.grace_period()?));
    let root = graceful_shutdown.token();
    let compaction = controller.limiter().spawn_compaction(&root);
    let session_refresh = audit.spawn_refresh(config.metrics.refresh_interval()?, &root);

    let handler = Arc::new(HttpHandler::new(
        controller,
        config.client_ip.trust_forwarded_headers,
    ));
    let app = router(handler);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Sneak Link gateway listening on {}", addr);

    let server_token = graceful_shutdown.token();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await
    });

    let early_exit = tokio::select! {
        reason = graceful_shutdown.run_signal_handler() => {
            tracing::info!("Shutdown signal received: {:?}, draining requests", reason);
            None
        }
        result = &mut server => Some(result),
    };

    let server_result = match early_exit {
        Some(result) => {
            graceful_shutdown.trigger_shutdown(ShutdownReason::Requested);
            result
        }
        None => match graceful_shutdown.drain(&mut server).await {
            Some(result) => result,
            None => {
                server.abort();
                Ok(Ok(()))
            }
        },
    };

    compaction.stop().await;
    session_refresh.stop().await;

    server_result
        .context("Server task panicked")?
        .context("Server error")?;

    tracing::info!("Sneak Link gateway stopped");
    Ok(())
}

/// Validate configuration and exit
fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    match config_path {
        Some(path) => println!("🔍 Validating configuration file: {path}"),
        None => println!("🔍 Validating configuration from environment"),
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

    let checked = GatewayConfigValidator::validate(&config)
        .map_err(eyre::Report::from)
        .and_then(|()| ServiceRegistry::from_config(&config.services).map_err(eyre::Report::from));

    match checked {
        Ok(registry) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Services: {}", registry.len());
            for service in registry.iter() {
                println!(
                    "     - {} ({}) -> {} [share paths: {}, session: {}]",
                    service.hostname,
                    service.service_type,
                    service.backend,
                    service.share_paths.join(", "),
                    service.grants_session
                );
            }
            println!("   • Session Max Age: {}", config.session.max_age);
            println!(
                "   • Rate Limit: {} requests per {}",
                config.rate_limit.requests, config.rate_limit.window
            );
            println!("   • Backend Timeout: {}", config.backend.timeout);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all service URLs start with http:// or https://");
            println!("   • Give unknown service types explicit share_paths");
            println!("   • Set signing_key (or SNEAK_LINK__SIGNING_KEY)");
            println!("   • Ensure durations use valid units (s, m, h)");
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

    let key: [u8; 32] = rand::random();
    let starter = starter_config(&hex::encode(key));

    tokio::fs::write(path, starter)
        .await
        .context("Failed to write config file")?;

    println!("✅ Created starter configuration at: {config_path}");
    println!("   client_ip.trust_forwarded_headers is on: disable it unless a trusted proxy fronts the gateway");
    println!("   Run 'sneak-link --config {config_path} serve' to start the gateway");
    Ok(())
}

fn starter_config(signing_key: &str) -> String {
    format!(
        r#"# Sneak Link gateway configuration

listen_addr = "0.0.0.0:8080"

# HMAC key for session cookies. Keep it secret.
signing_key = "{signing_key}"

[session]
max_age = "24h"

[rate_limit]
requests = 10
window = "5m"

[backend]
timeout = "5s"

# Only keep this on behind a trusted reverse proxy that overwrites
# X-Forwarded-For. Clients that reach the gateway directly can forge the header
# and get a fresh knock budget per request; set it to false in that case.
[client_ip]
trust_forwarded_headers = true

[logging]
level = "info"
json = true

[[services]]
hostname = "cloud.example.com"
type = "nextcloud"
url = "http://nextcloud:80"

# [[services]]
# hostname = "photos.example.com"
# type = "immich"
# url = "http://immich:2283"

# [[services]]
# hostname = "docs.example.com"
# type = "paperless"
# url = "http://paperless:8000"
"#
    )
}

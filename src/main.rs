//! Approval Gateway - access-control and audit gateway
//!
//! Serves the guarded content-approval API: session and magic-link
//! authentication, tenant isolation, per-identity rate limits and an
//! append-only audit trail.

use std::env;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use approval_gateway::{
    build_router, config, db, middleware, services, AppConfig, AppState,
};
use config::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("Approval Gateway {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must stay alive so buffered file logs are flushed
    let _log_guard = init_logging(&config);

    info!("Approval Gateway starting up");

    ensure_data_directory(&config)?;

    info!("Initializing database connection");
    let db = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::new(config.clone(), db);

    if let Some(pos) = args.iter().position(|arg| arg == "--create-admin") {
        let (Some(email), Some(password)) = (args.get(pos + 1), args.get(pos + 2)) else {
            anyhow::bail!("--create-admin requires <email> <password>");
        };
        return create_admin(&state, email, password).await;
    }

    if args.iter().any(|arg| arg == "--cleanup") {
        return run_cleanup(&state).await;
    }

    let maintenance_scheduler = if config.maintenance.enabled {
        info!("Starting maintenance scheduler: {}", config.maintenance.schedule);
        Some(services::start_maintenance_scheduler(
            state.maintenance.clone(),
            &config.maintenance,
            config.rate_limit.sweep_interval_secs,
        )?)
    } else {
        info!("Scheduled maintenance is disabled");
        None
    };

    middleware::flood_guard::spawn_flood_guard_cleanup(state.flood_guard.clone());

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    if let Some(ref tls_config) = config.server.tls {
        info!("Starting HTTPS server on https://{}", addr);
        info!("TLS certificate: {:?}", tls_config.cert_file);

        let rustls_config = create_rustls_config(tls_config).await?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;

        info!("HTTPS server is ready to accept connections");

        // axum-server keeps ConnectInfo available to the guard chain
        axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .context("HTTPS server error")?;
    } else {
        info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;

        info!("HTTP server is ready to accept connections");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    }

    if let Some(scheduler) = maintenance_scheduler {
        scheduler.stop().await;
    }
    info!("Approval Gateway stopped");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Seed an administrator account
async fn create_admin(state: &AppState, email: &str, password: &str) -> Result<()> {
    let name = email.split('@').next().unwrap_or(email);
    let account = state
        .auth
        .create_admin(email, name, password)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create administrator: {}", e))?;

    println!("Created administrator {} (id {})", account.email, account.id);
    Ok(())
}

/// Run retention cleanup, token purge and bucket sweep once, then exit
async fn run_cleanup(state: &AppState) -> Result<()> {
    let report = state.maintenance.run_once(Utc::now()).await;

    println!("Audit events removed: {}", report.audit_events_removed);
    println!("Tokens purged:        {}", report.tokens_purged);
    println!("Buckets swept:        {}", report.buckets_swept);

    if report.is_clean() {
        Ok(())
    } else {
        for error in &report.errors {
            warn!("Maintenance error: {}", error);
        }
        anyhow::bail!("Maintenance finished with {} error(s)", report.errors.len())
    }
}

/// Create RusTLS configuration from TLS config
async fn create_rustls_config(
    tls_config: &config::TlsConfig,
) -> Result<axum_server::tls_rustls::RustlsConfig> {
    use axum_server::tls_rustls::RustlsConfig;
    use rustls::crypto::aws_lc_rs::default_provider;
    use rustls::ServerConfig;

    let cert_file = std::fs::File::open(&tls_config.cert_file)
        .with_context(|| format!("Failed to open certificate file: {:?}", tls_config.cert_file))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .filter_map(|r| r.ok())
        .collect();

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {:?}", tls_config.cert_file);
    }

    let key_file = std::fs::File::open(&tls_config.key_file)
        .with_context(|| format!("Failed to open key file: {:?}", tls_config.key_file))?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Failed to read private key: {:?}", tls_config.key_file))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {:?}", tls_config.key_file))?;

    let versions: Vec<&'static rustls::SupportedProtocolVersion> =
        match tls_config.min_version.as_str() {
            "1.3" => vec![&rustls::version::TLS13],
            _ => vec![&rustls::version::TLS12, &rustls::version::TLS13],
        };

    info!("TLS configured with minimum version: {}", tls_config.min_version);

    let mut server_config = ServerConfig::builder_with_provider(default_provider().into())
        .with_protocol_versions(&versions)
        .context("Failed to set TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS server config")?;

    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    match &log_config.target {
        LogTarget::Console => {
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(subscriber, &log_config.format);
            None
        }
        LogTarget::File => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_file_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
        LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_both_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

fn init_console_logging<S>(subscriber: S, format: &LogFormat)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => subscriber.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_target(false))
            .init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init(),
    }
}

fn init_file_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init(),
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_target(false).with_writer(writer))
            .init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
            .init(),
    }
}

fn init_both_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_target(true))
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init(),
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_target(false))
            .with(fmt::layer().compact().with_target(false).with_writer(writer))
            .init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(true))
            .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
            .init(),
    }
}

/// Ensure the directory holding the SQLite file exists
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"Approval Gateway {}

USAGE:
    approval-gateway [OPTIONS]

OPTIONS:
    -h, --help                          Print this help message
    -V, --version                       Print version information
    --cleanup                           Run audit retention, token purge and
                                        rate-limit sweep once, then exit
    --create-admin <EMAIL> <PASSWORD>   Create an administrator account and exit

ENVIRONMENT:
    GATEWAY_CONFIG      Path to configuration file (default: config.yaml)
    RUST_LOG            Log filter, overrides logging.level

CONFIGURATION:
    The gateway looks for configuration files in the following order:
    1. Path specified by GATEWAY_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/approval-gateway/config.yaml
    5. $XDG_CONFIG_HOME/approval-gateway/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}

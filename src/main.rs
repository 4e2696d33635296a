//! COSI Controller Manager
//!
//! Watches BucketRequests and BucketAccessRequests in every namespace and
//! provisions the matching Bucket and BucketAccess objects.

use anyhow::Context;
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cosi_controller_manager::repository::kube_api::FIELD_MANAGER;
use cosi_controller_manager::{
    all_crds, BucketDefaults, ControllerManager, ControllerManagerConfig, KubeRepository,
    ProvisionMetrics, RetryConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// COSI Controller Manager - provisions Buckets and BucketAccesses
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a kubeconfig file; in-cluster or default config when unset
    #[arg(long, env = "KUBECONFIG_PATH")]
    kube_config: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Default S3 endpoint written into new Buckets
    #[arg(long, env = "S3_ENDPOINT", default_value = "aws.com/s3")]
    s3_endpoint: String,

    /// Default S3 region written into new Buckets
    #[arg(long, env = "S3_REGION", default_value = "US")]
    s3_region: String,

    /// Default S3 signature version written into new Buckets
    #[arg(long, env = "S3_SIGNATURE_VERSION", default_value = "s3v2")]
    s3_signature_version: String,

    /// First retry delay after a failed reconcile, in seconds
    #[arg(long, env = "RETRY_INITIAL_SECS", default_value = "1")]
    retry_initial_secs: u64,

    /// Longest retry delay, in seconds
    #[arg(long, env = "RETRY_MAX_SECS", default_value = "300")]
    retry_max_secs: u64,

    /// Delay while a referenced object is not ready, in seconds
    #[arg(long, env = "DEPENDENCY_REQUEUE_SECS", default_value = "10")]
    dependency_requeue_secs: u64,

    /// Field manager recorded on every write to the API server
    #[arg(long, env = "FIELD_MANAGER", default_value = FIELD_MANAGER)]
    field_manager: String,

    /// Print the CRDs as YAML and exit
    #[arg(long)]
    print_crds: bool,
}

impl Args {
    fn manager_config(&self) -> ControllerManagerConfig {
        ControllerManagerConfig {
            bucket: BucketDefaults {
                s3_endpoint: self.s3_endpoint.clone(),
                s3_region: self.s3_region.clone(),
                s3_signature_version: self.s3_signature_version.clone(),
                ..Default::default()
            },
            retry: RetryConfig {
                initial_interval: Duration::from_secs(self.retry_initial_secs),
                max_interval: Duration::from_secs(self.retry_max_secs),
                dependency_requeue: Duration::from_secs(self.dependency_requeue_secs),
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crds {
        for crd in all_crds() {
            println!("---");
            print!("{}", serde_yaml::to_string(&crd)?);
        }
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting COSI Controller Manager");
    info!("  Version: {}", cosi_controller_manager::VERSION);
    info!("  Health: {}", args.health_addr);
    info!("  Metrics: {}", args.metrics_addr);

    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .with_context(|| format!("invalid health server address {}", args.health_addr))?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", args.metrics_addr))?;

    let client = kube_client(args.kube_config.as_deref()).await?;
    let metrics = Arc::new(ProvisionMetrics::register(prometheus::default_registry())?);
    let cancel = CancellationToken::new();

    let manager = ControllerManager::new(
        args.manager_config(),
        Arc::new(KubeRepository::new(client.clone()).with_field_manager(&args.field_manager)),
        Some(metrics),
        cancel.clone(),
    );

    // Start health server
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::spawn(shutdown_on_signal(cancel));

    manager.run(client).await;

    info!("Controller manager shutdown complete");
    Ok(())
}

async fn kube_client(path: Option<&str>) -> anyhow::Result<Client> {
    let Some(path) = path else {
        return Client::try_default()
            .await
            .context("failed to create Kubernetes client");
    };

    let kubeconfig =
        Kubeconfig::read_from(path).with_context(|| format!("failed to read kubeconfig {}", path))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("failed to load kubeconfig {}", path))?;
    Ok(Client::try_from(config)?)
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    cancel.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_runtime=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = text_response(StatusCode::OK, buffer);
                            if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                        }
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, Infallible>(response)
        }))
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}

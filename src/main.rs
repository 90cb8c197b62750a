//! Unified Replication Operator
//!
//! Runs the volume and group replication controllers against the cluster in
//! the current kubeconfig context, plus health and metrics endpoints.

use anyhow::Context as _;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use unified_replication_operator::controller::runner;
use unified_replication_operator::crd::crd_manifests;
use unified_replication_operator::domain::ports::{BackendObjectStoreRef, ReplicationStoreRef};
use unified_replication_operator::{
    AdapterRegistry, BackendConfig, BackoffConfig, Context, Error, KubeObjectStore,
    KubeReplicationStore, ReconcileMetrics, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Unified Replication Operator - one replication API for Ceph, Trident and PowerStore
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
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

    /// Print the CRD manifests as YAML and exit
    #[arg(long)]
    print_crds: bool,

    /// First retry delay after a failed pass, in milliseconds
    #[arg(long, env = "BACKOFF_INITIAL_MS", default_value = "500")]
    backoff_initial_ms: u64,

    /// Upper bound on the retry delay, in seconds
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value = "300")]
    backoff_max_secs: u64,

    /// Class parameter naming the Ceph VolumeReplicationClass
    #[arg(long, env = "CEPH_REPLICATION_CLASS_KEY", default_value = "volumeReplicationClass")]
    ceph_replication_class_key: String,

    /// Class parameter holding the Trident remote volume handle
    #[arg(long, env = "TRIDENT_REMOTE_VOLUME_KEY", default_value = "remoteVolumeHandle")]
    trident_remote_volume_key: String,

    /// Class parameter naming the remote PowerStore system
    #[arg(long, env = "POWERSTORE_REMOTE_SYSTEM_KEY", default_value = "remoteSystem")]
    powerstore_remote_system_key: String,
}

impl Args {
    fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::default();
        config.ceph.replication_class_key = self.ceph_replication_class_key.clone();
        config.trident.remote_volume_key = self.trident_remote_volume_key.clone();
        config.powerstore.remote_system_key = self.powerstore_remote_system_key.clone();
        config
    }

    fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(self.backoff_initial_ms),
            max_interval: Duration::from_secs(self.backoff_max_secs),
            ..Default::default()
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
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_logging(&args);

    info!("Starting Unified Replication Operator");
    info!("  Version: {}", unified_replication_operator::VERSION);
    info!("  Health: {}", args.health_addr);
    info!("  Metrics: {}", args.metrics_addr);

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    // Backend adapters
    let objects: BackendObjectStoreRef = Arc::new(KubeObjectStore::new(client.clone()));
    let registry = AdapterRegistry::with_defaults(objects, &args.backend_config())?;
    info!("Registered backends: {:?}", registry.kinds());

    // Metrics
    let metrics_registry = prometheus::Registry::new();
    let metrics = ReconcileMetrics::new(&metrics_registry)?;

    let store: ReplicationStoreRef = Arc::new(KubeReplicationStore::new(client.clone()));
    let ctx = Arc::new(Context::new(
        store,
        Arc::new(registry),
        metrics,
        args.backoff_config(),
    ));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ctx).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    runner::run(client, ctx)
        .await
        .context("replication controllers failed")?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_string(),
        _ => "info".to_string(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,kube=info", level)));

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
}

// =============================================================================
// Health Server
// =============================================================================

/// Liveness always answers; readiness waits for the controllers to start
fn health_response(path: &str, ready: bool) -> hyper::Response<hyper::Body> {
    use hyper::{Body, Response, StatusCode};

    let mut response = Response::new(Body::empty());
    match path {
        "/healthz" | "/livez" => *response.body_mut() = Body::from("ok"),
        "/readyz" if ready => *response.body_mut() = Body::from("ok"),
        "/readyz" => {
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            *response.body_mut() = Body::from("controllers not started");
        }
        _ => {
            *response.status_mut() = StatusCode::NOT_FOUND;
            *response.body_mut() = Body::from("not found");
        }
    }
    response
}

async fn run_health_server(addr: &str, ctx: Arc<Context>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let response = health_response(req.uri().path(), ctx.is_ready());
                async move { Ok::<_, std::convert::Infallible>(response) }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: prometheus::Registry) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                                        response.headers_mut().insert(CONTENT_TYPE, value);
                                    }
                                    *response.body_mut() = Body::from(buffer);
                                }
                                Err(e) => {
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                    *response.body_mut() = Body::from(e.to_string());
                                }
                            }
                        }
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    #[test]
    fn test_readiness_waits_for_controllers() {
        assert_eq!(health_response("/readyz", false).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health_response("/readyz", true).status(), StatusCode::OK);
    }

    #[test]
    fn test_liveness_independent_of_readiness() {
        assert_eq!(health_response("/healthz", false).status(), StatusCode::OK);
        assert_eq!(health_response("/livez", false).status(), StatusCode::OK);
        assert_eq!(health_response("/metrics", true).status(), StatusCode::NOT_FOUND);
    }
}

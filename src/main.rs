//! scaledrive operator
//!
//! Scales Kubernetes workloads on external metrics read from Prometheus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      scaledrive operator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Metric    │───▶│ Policy+Gate  │───▶│ Scale Target │       │
//! │  │    Source    │    │    (Brain)   │    │   (Hands)    │       │
//! │  │    (Eyes)    │    │              │    │              │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │         one reconcile loop per ScaledObject                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scaledrive::controller::{self, ControllerContext};
use scaledrive::crd::ScaledObject;
use scaledrive::metrics::{operator, MetricsConfig, MetricsWatcher};
use scaledrive::scaler::{BackoffPolicy, LoopConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// scaledrive - external-metric autoscaler for Kubernetes workloads
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Default Prometheus server URL for triggers without serverAddress
    #[arg(
        long,
        env = "PROMETHEUS_URL",
        default_value = "http://prometheus.monitoring.svc.cluster.local:9090"
    )]
    prometheus_url: String,

    /// Upper bound for a single metric query, in seconds
    #[arg(long, env = "METRIC_QUERY_TIMEOUT_SECONDS", default_value = "10")]
    metric_query_timeout_seconds: u64,

    /// Metric attempts per tick before holding the last desired value
    #[arg(long, env = "METRIC_RETRY_ATTEMPTS", default_value = "3")]
    metric_retry_attempts: u32,

    /// Delay before the first metric retry, in milliseconds
    #[arg(long, env = "BACKOFF_INITIAL_MS", default_value = "200")]
    backoff_initial_ms: u64,

    /// Cap for the metric retry delay, in milliseconds
    #[arg(long, env = "BACKOFF_MAX_MS", default_value = "5000")]
    backoff_max_ms: u64,

    /// Serve repeated metric queries from a cache for this many seconds (0 disables)
    #[arg(long, env = "METRIC_CACHE_TTL_SECONDS", default_value = "0")]
    metric_cache_ttl_seconds: u64,

    /// Enable dry-run mode for every ScaledObject (log only, no writes)
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the ScaledObject CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn loop_config(&self) -> anyhow::Result<LoopConfig> {
        if self.metric_query_timeout_seconds == 0 {
            anyhow::bail!("--metric-query-timeout-seconds must be greater than 0");
        }
        if self.metric_retry_attempts == 0 {
            anyhow::bail!("--metric-retry-attempts must be at least 1");
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            anyhow::bail!("--backoff-initial-ms must not exceed --backoff-max-ms");
        }

        Ok(LoopConfig {
            metric_timeout: Duration::from_secs(self.metric_query_timeout_seconds),
            max_metric_attempts: self.metric_retry_attempts,
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.backoff_initial_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
            dry_run: self.dry_run,
        })
    }

    fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            prometheus_url: self.prometheus_url.clone(),
            query_timeout: Duration::from_secs(self.metric_query_timeout_seconds),
            cache_enabled: self.metric_cache_ttl_seconds > 0,
            cache_ttl: Duration::from_secs(self.metric_cache_ttl_seconds),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&ScaledObject::crd())?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    // Invalid startup configuration is the only fatal error
    let loop_config = args.loop_config()?;
    let metrics_config = args.metrics_config();

    info!("Starting scaledrive operator");
    info!("  Prometheus URL: {}", args.prometheus_url);
    info!(
        "  Metric timeout: {:?}, attempts: {}",
        loop_config.metric_timeout, loop_config.max_metric_attempts
    );
    info!("  Metric cache TTL: {}s", args.metric_cache_ttl_seconds);
    info!("  Dry-run mode: {}", args.dry_run);

    operator::register();

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .context("Kubernetes client creation failed")?;

    info!("Connected to Kubernetes cluster");

    // Check Prometheus health
    let default_watcher = MetricsWatcher::new(metrics_config.clone())?;
    if let Err(e) = default_watcher.health_check().await {
        error!("Prometheus health check failed: {}", e);
        error!("Continuing anyway - metrics may not be available");
    } else {
        info!("Prometheus connection healthy");
    }

    let ctx = ControllerContext::new(client, loop_config, metrics_config);
    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    let health_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready, health_ctx).await {
            error!("Health server error: {:#}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    // Run the controller
    ready.store(true, Ordering::SeqCst);
    controller::run(ctx).await?;

    info!("Operator shutdown complete");
    Ok(())
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
        .add_directive("tower=warn".parse()?);

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
// HTTP Helpers
// =============================================================================

type Body = http_body_util::Full<hyper::body::Bytes>;

fn text_response(status: hyper::StatusCode, body: impl Into<hyper::body::Bytes>) -> hyper::Response<Body> {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn serve<F, Fut>(addr: &str, name: &str, handler: F) -> anyhow::Result<()>
where
    F: Fn(hyper::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = std::result::Result<hyper::Response<Body>, std::convert::Infallible>>
        + Send
        + 'static,
{
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid {} server address: {}", name, addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} server", name))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .with_context(|| format!("{} server accept error", name))?;

        let io = TokioIo::new(stream);
        let handler = handler.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                tracing::error!("{} server connection error: {}", name, e);
            }
        });
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Readiness from controller startup and the last metric query of every
/// Prometheus server in use.
fn readiness(started: bool, metric_sources_healthy: bool) -> (hyper::StatusCode, &'static str) {
    use hyper::StatusCode;

    match (started, metric_sources_healthy) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "starting"),
        (true, false) => (StatusCode::SERVICE_UNAVAILABLE, "metric source unavailable"),
        (true, true) => (StatusCode::OK, "ok"),
    }
}

async fn run_health_server(
    addr: &str,
    ready: Arc<AtomicBool>,
    ctx: Arc<ControllerContext>,
) -> anyhow::Result<()> {
    use hyper::StatusCode;

    serve(addr, "Health", move |req: hyper::Request<hyper::body::Incoming>| {
        let ready = ready.clone();
        let ctx = ctx.clone();
        async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                "/readyz" => {
                    let (status, body) =
                        readiness(ready.load(Ordering::SeqCst), ctx.metric_sources_healthy());
                    text_response(status, body)
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok(response)
        }
    })
    .await
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use hyper::StatusCode;
    use prometheus::{Encoder, TextEncoder};

    serve(addr, "Metrics", |req: hyper::Request<hyper::body::Incoming>| async move {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                match encoder.encode(&prometheus::gather(), &mut buffer) {
                    Ok(()) => {
                        let mut response = text_response(StatusCode::OK, buffer);
                        if let Ok(value) =
                            hyper::header::HeaderValue::from_str(encoder.format_type())
                        {
                            response
                                .headers_mut()
                                .insert(hyper::header::CONTENT_TYPE, value);
                        }
                        response
                    }
                    Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                }
            }
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    })
    .await
}

//! OceanStor Report
//!
//! Command-line report for an OceanStor backend: initializes the plugin from a
//! backend configuration file, negotiates capabilities, reports the free
//! capacity of the requested pools and optionally keeps refreshing them while
//! serving Prometheus metrics.

use anyhow::Context;
use clap::Parser;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oceanstor_backend::{
    BackendConfig, BackendPlugin, OceanstorPlugin, PluginFactory, PoolCapability,
    ProductFamily, RequestContext, RestClientFactory, RestClientOptions,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// OceanStor Report - capability and capacity report for an OceanStor backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend configuration file (YAML or JSON)
    #[arg(long, env = "OCEANSTOR_CONFIG", required_unless_present = "print_schema")]
    config: Option<PathBuf>,

    /// Backend type (oceanstor-san, oceanstor-nas)
    #[arg(long, env = "OCEANSTOR_BACKEND_TYPE", default_value = "oceanstor-san")]
    backend_type: String,

    /// Backend name used in logs and metric labels
    #[arg(long, env = "OCEANSTOR_BACKEND_NAME", default_value = "oceanstor")]
    name: String,

    /// Pools to report, comma separated
    #[arg(long, env = "OCEANSTOR_POOLS", value_delimiter = ',')]
    pools: Vec<String>,

    /// Accept self-signed array certificates
    #[arg(long, env = "OCEANSTOR_INSECURE")]
    insecure: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "60")]
    request_timeout_secs: u64,

    /// Keep refreshing at this interval instead of exiting after one report
    #[arg(long, env = "WATCH_INTERVAL")]
    watch_interval_secs: Option<u64>,

    /// Metrics server bind address (watch mode only)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    print_schema: bool,
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    backend: &'a str,
    product: ProductFamily,
    capabilities: BTreeMap<&'static str, bool>,
    pools: IndexMap<String, PoolCapability>,
    generated_at: chrono::DateTime<chrono::Utc>,
}

async fn report(
    plugin: &OceanstorPlugin,
    pools: &[String],
    ctx: &RequestContext,
) -> oceanstor_backend::Result<()> {
    let capabilities = plugin.refresh_capabilities(ctx).await?;
    let pools = plugin.update_pool_capabilities(pools, ctx).await?;

    let summary = Report {
        backend: plugin.name(),
        product: plugin.product(),
        capabilities: capabilities.to_map(),
        pools,
        generated_at: chrono::Utc::now(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_schema {
        println!("{}", serde_json::to_string_pretty(&BackendConfig::json_schema())?);
        return Ok(());
    }

    init_logging(&args);

    info!("Starting OceanStor Report");
    info!("  Version: {}", oceanstor_backend::VERSION);
    info!("  Backend type: {}", args.backend_type);
    info!("  Pools: {:?}", args.pools);

    let path = args.config.as_ref().context("--config is required")?;
    let config = BackendConfig::from_file(path)
        .with_context(|| format!("loading backend configuration from {}", path.display()))?;
    let usage = PluginFactory::usage_for(&args.backend_type)?;

    let factory = Arc::new(RestClientFactory::new(RestClientOptions {
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        accept_invalid_certs: args.insecure,
    }));

    let ctx = RequestContext::new();
    let plugin = OceanstorPlugin::init(&args.name, usage, config, factory, true, &ctx)
        .await
        .context("initializing backend")?;

    let outcome = run(&args, &plugin, &ctx).await;

    if let Err(e) = plugin.release(&RequestContext::new()).await {
        warn!("Logout failed: {}", e);
    }
    info!("OceanStor Report stopped");
    outcome
}

async fn run(args: &Args, plugin: &OceanstorPlugin, ctx: &RequestContext) -> anyhow::Result<()> {
    let Some(interval) = args.watch_interval_secs else {
        return report(plugin, &args.pools, ctx).await.context("reporting backend");
    };

    if let Some(addr) = args.metrics_addr.clone() {
        let registry = plugin.metrics().registry().clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, registry).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match report(plugin, &args.pools, &ctx.child()).await {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => warn!("Refresh failed, will retry: {}", e),
                    Err(e) => error!("Refresh failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                ctx.cancel();
                return Ok(());
            }
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

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
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: prometheus::Registry) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};
    use std::convert::Infallible;

    fn respond(registry: &prometheus::Registry, req: &Request<Body>) -> Response<Body> {
        match req.uri().path() {
            "/metrics" => {
                let mut buffer = Vec::new();
                if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                    let mut response = Response::new(Body::from(e.to_string()));
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    return response;
                }
                let mut response = Response::new(Body::from(buffer));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                response
            }
            "/healthz" => Response::new(Body::from("ok")),
            _ => {
                let mut response = Response::new(Body::from("not found"));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
        }
    }

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = respond(&registry, &req);
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}

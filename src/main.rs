// src/main.rs
use anyhow::Result;
use clap::Parser;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use exproxyment::config::{CliArgs, Config};
use exproxyment::health::{HealthScheduler, DEFAULT_PERIOD as HEALTH_CHECK_PERIOD};
use exproxyment::metrics::MetricsRegistry;
use exproxyment::proxy::ProxyContext;
use exproxyment::server::{RequestHandler, ServerBuilder};
use exproxyment::state::RoutingTable;

const METRICS_PORT: u16 = 9090;
const METRICS_PATH: &str = "/metrics";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exproxyment=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config = Config::from_args(CliArgs::parse())?;
    info!(port = config.port, backends = config.backends.len(), "starting exproxyment");

    let table = Arc::new(RoutingTable::new());
    table.set_backends(config.backends.clone());
    table.set_weights(config.weights.clone());

    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    let scheduler = Arc::new(HealthScheduler::new(table.clone(), HEALTH_CHECK_PERIOD, metrics.clone()));
    tokio::spawn(scheduler.run());

    let metrics_addr: SocketAddr = ([0, 0, 0, 0], METRICS_PORT).into();
    start_metrics_server(metrics_addr, metrics_registry, METRICS_PATH).await?;

    let ctx = Arc::new(ProxyContext {
        table,
        config: Arc::new(config.clone()),
        client: reqwest::Client::new(),
        metrics,
    });

    let handler = RequestHandler::new(ctx);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!("proxying on {}", addr);

    tokio::select! {
        result = ServerBuilder::new(addr).with_handler(handler).serve() => result?,
        _ = shutdown_signal() => info!("shutting down"),
    }

    Ok(())
}

async fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: &'static str) -> Result<()> {
    let registry = Arc::new(registry);

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();

                async move {
                    let response = if req.uri().path() == path {
                        Response::builder()
                            .status(StatusCode::OK)
                            .header("Content-Type", "text/plain; version=0.0.4")
                            .body(Body::from(registry.gather()))
                            .expect("status/body are always valid")
                    } else {
                        Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::empty())
                            .expect("status/body are always valid")
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_service);
    info!("metrics listening on http://{}{}", addr, path);

    tokio::spawn(async move {
        if let Err(err) = server.await {
            error!(%err, "metrics server error");
        }
    });

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! ---
//! ordset_section: "03-observability"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Metrics collection and export utilities."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder,
    TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across crates.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to resolve metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let mut buffer = Vec::new();
    let encoded = TextEncoder::new()
        .encode(&families, &mut buffer)
        .map_err(anyhow::Error::from)
        .and_then(|()| String::from_utf8(buffer).map_err(anyhow::Error::from));
    match encoded {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: IntGaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "ordsetd_starts_total",
            "Total number of times the ordset daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ordsetd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = IntGaugeVec::new(
            Opts::new(
                "ordsetd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1);
    }
}

impl std::fmt::Debug for DaemonMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_metrics_register_once_per_registry() {
        let registry = new_registry();
        let metrics = DaemonMetrics::new(registry.clone()).expect("register");
        metrics.inc_start();
        metrics.set_build_info("0.1.0");
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"ordsetd_starts_total".to_owned()));
        assert!(names.contains(&"ordsetd_build_info".to_owned()));
        assert!(DaemonMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn handler_serves_text_exposition() {
        let registry = new_registry();
        let metrics = DaemonMetrics::new(registry.clone()).expect("register");
        metrics.inc_start();

        let response = metrics_handler(registry).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static(TEXT_FORMAT))
        );
    }

    #[tokio::test]
    async fn exporter_binds_ephemeral_port_and_shuts_down() {
        let registry = new_registry();
        let server = spawn_http_server(registry, SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("bind exporter");
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.expect("clean shutdown");
    }
}

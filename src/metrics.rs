//! Prometheus metrics for ingestion runs.
//!
//! [`Metrics`] holds its own [`Registry`] so several pipelines (or tests)
//! can coexist in one process. Counters are updated live by the stages;
//! [`Metrics::serve`] exposes them in the text exposition format on
//! `/metrics`.

use async_trait::async_trait;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info};
use url::Url;

use crate::analyzer::{AnalyzeError, Analyzer};
use crate::graph::Inserted;
use crate::parser::DependencyRecord;
use crate::pipeline::Stage;

/// Path the exporter answers on.
pub const METRICS_PATH: &str = "/metrics";

/// Analyzer latency buckets, in seconds.
const ANALYZE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("Failed to bind metrics endpoint on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },

    #[error("Metrics output is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Live counters for one pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    nodes: IntCounterVec,
    edges: IntCounterVec,
    errors: IntCounterVec,
    analyze_seconds: HistogramVec,
}

fn outcome_label(inserted: Inserted) -> &'static str {
    match inserted {
        Inserted::Created => "created",
        Inserted::AlreadyExists => "existing",
    }
}

impl Metrics {
    /// Creates the metric families and registers them in a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let nodes = IntCounterVec::new(
            Opts::new("depgraph_nodes_total", "Node inserts by outcome"),
            &["outcome"],
        )?;
        let edges = IntCounterVec::new(
            Opts::new("depgraph_edges_total", "Edge inserts by outcome"),
            &["outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("depgraph_errors_total", "Per-item errors by pipeline stage"),
            &["stage"],
        )?;
        let analyze_seconds = HistogramVec::new(
            HistogramOpts::new(
                "depgraph_analyze_duration_seconds",
                "Duration of dependency analyzer calls",
            )
            .buckets(ANALYZE_BUCKETS.to_vec()),
            &["outcome"],
        )?;

        registry.register(Box::new(nodes.clone()))?;
        registry.register(Box::new(edges.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(analyze_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            nodes,
            edges,
            errors,
            analyze_seconds,
        })
    }

    pub fn record_node(&self, inserted: Inserted) {
        self.nodes.with_label_values(&[outcome_label(inserted)]).inc();
    }

    pub fn record_edge(&self, inserted: Inserted) {
        self.edges.with_label_values(&[outcome_label(inserted)]).inc();
    }

    pub fn record_error(&self, stage: Stage) {
        self.errors.with_label_values(&[stage.label()]).inc();
    }

    /// Records one completed analyzer call.
    pub fn observe_analysis(&self, elapsed: Duration, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.analyze_seconds
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Returns the current value of a node counter.
    pub fn nodes(&self, inserted: Inserted) -> u64 {
        self.nodes.with_label_values(&[outcome_label(inserted)]).get()
    }

    /// Returns the current value of an edge counter.
    pub fn edges(&self, inserted: Inserted) -> u64 {
        self.edges.with_label_values(&[outcome_label(inserted)]).get()
    }

    /// Returns the number of errors recorded for `stage`.
    pub fn errors(&self, stage: Stage) -> u64 {
        self.errors.with_label_values(&[stage.label()]).get()
    }

    /// Returns the number of analyzer calls observed, successful or not.
    pub fn analyses(&self) -> u64 {
        ["ok", "error"]
            .into_iter()
            .map(|outcome| {
                self.analyze_seconds
                    .with_label_values(&[outcome])
                    .get_sample_count()
            })
            .sum()
    }

    /// Encodes every metric in the text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Wraps `analyzer` so every call is timed into this registry.
    pub fn instrument(&self, analyzer: Arc<dyn Analyzer>) -> Arc<dyn Analyzer> {
        Arc::new(TimedAnalyzer {
            inner: analyzer,
            metrics: self.clone(),
        })
    }

    /// Serves the registry on `addr` until the returned task is aborted.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub fn serve(&self, addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>), MetricsError> {
        let registry = Arc::clone(&self.registry);
        let make_service = make_service_fn(move |_| {
            let registry = Arc::clone(&registry);
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let registry = Arc::clone(&registry);
                    async move { Ok::<_, Infallible>(respond(&registry, &req)) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|source| MetricsError::Bind { addr, source })?
            .serve(make_service);
        let bound = server.local_addr();
        info!(addr = %bound, "Serving metrics on http://{}{}", bound, METRICS_PATH);

        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                error!("Metrics endpoint failed: {}", err);
            }
        });
        Ok((bound, handle))
    }
}

fn respond(registry: &Registry, req: &Request<Body>) -> Response<Body> {
    if req.uri().path() != METRICS_PATH {
        let mut response = Response::new(Body::from("not found\n"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return response;
    }

    let mut response = Response::new(Body::from(buffer));
    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Analyzer decorator feeding the call-duration histogram.
struct TimedAnalyzer {
    inner: Arc<dyn Analyzer>,
    metrics: Metrics,
}

#[async_trait]
impl Analyzer for TimedAnalyzer {
    fn exists(&self) -> bool {
        self.inner.exists()
    }

    async fn analyze(&self, locator: &Url) -> Result<DependencyRecord, AnalyzeError> {
        let started = Instant::now();
        let result = self.inner.analyze(locator).await;
        self.metrics.observe_analysis(started.elapsed(), result.is_ok());
        result
    }
}

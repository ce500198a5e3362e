//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` is intended per process. The pipeline increments
//! these handles on its hot path; the binary decides whether to expose them.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9100`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Prometheus metrics registry + handles.
///
/// Cloning is cheap: every handle is reference counted, so a clone can be
/// handed to the pipeline while the binary keeps serving the registry.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Encoded (A2DP) path
    pub media_packets_sent_total: IntCounter,
    pub media_bytes_sent_total: IntCounter,
    pub send_retries_total: IntCounter,
    pub flushes_truncated_total: IntCounter,
    pub flushes_failed_total: IntCounter,
    pub encode_errors_total: IntCounter,
    pub sbc_frames_encoded_total: IntCounter,

    // Raw (SCO) path
    pub raw_packets_sent_total: IntCounter,
    pub raw_packets_received_total: IntCounter,

    // Latency histograms (seconds)
    pub encode_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    // ---
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the standard metrics.
    ///
    /// `process_name` is applied as a constant label (`process=<name>`).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some("bt_pcm".into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;

        let media_packets_sent_total = counter(
            &registry,
            "media_packets_sent_total",
            "Total AVDTP media packets flushed to the transport",
        )?;
        let media_bytes_sent_total = counter(
            &registry,
            "media_bytes_sent_total",
            "Total AVDTP media bytes accepted by the transport",
        )?;
        let send_retries_total = counter(
            &registry,
            "send_retries_total",
            "Short sends that triggered another attempt",
        )?;
        let flushes_truncated_total = counter(
            &registry,
            "flushes_truncated_total",
            "Media packets dropped partially after exhausting send attempts",
        )?;
        let flushes_failed_total = counter(
            &registry,
            "flushes_failed_total",
            "Media packets dropped because the transport reported an error",
        )?;
        let encode_errors_total = counter(
            &registry,
            "encode_errors_total",
            "PCM windows discarded because the SBC encoder rejected them",
        )?;
        let sbc_frames_encoded_total = counter(
            &registry,
            "sbc_frames_encoded_total",
            "Total SBC frames produced",
        )?;
        let raw_packets_sent_total = counter(
            &registry,
            "raw_packets_sent_total",
            "Total raw transport packets sent",
        )?;
        let raw_packets_received_total = counter(
            &registry,
            "raw_packets_received_total",
            "Total raw transport packets received",
        )?;

        let encode_seconds = Histogram::with_opts(
            HistogramOpts::new("sbc_encode_seconds", "SBC encode duration in seconds")
                .buckets(prometheus::exponential_buckets(1e-6, 4.0, 8)?),
        )?;
        registry.register(Box::new(encode_seconds.clone()))?;

        Ok(Self {
            registry,
            media_packets_sent_total,
            media_bytes_sent_total,
            send_retries_total,
            flushes_truncated_total,
            flushes_failed_total,
            encode_errors_total,
            sbc_frames_encoded_total,
            raw_packets_sent_total,
            raw_packets_received_total,
            encode_seconds,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<Vec<u8>> {
        // ---
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let context = Arc::new(self.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let context = Arc::clone(&context);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let context = Arc::clone(&context);
                        async move { handle_metrics_request(req, context).await }
                    }))
                }
            });

            let server = Server::bind(&cfg.bind).serve(make_svc);
            server.await.map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        })
    }
}

async fn handle_metrics_request(
    req: Request<Body>,
    context: Arc<MetricsContext>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match context.render() {
            Ok(buffer) => {
                let mut resp = Response::new(Body::from(buffer));
                resp.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                Ok(resp)
            }
            Err(e) => {
                let mut resp = Response::new(Body::from(format!("encode error: {e}")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                Ok(resp)
            }
        },
        _ => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}

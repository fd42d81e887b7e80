//! Logs, traces and metrics for the control plane process.
//!
//! # Purpose
//! One call at startup sets up everything the HTTP API, the gRPC gateway and
//! the stores report through:
//! - a `tracing` registry filtered by `RUST_LOG` (default `info,sqlx=warn`);
//! - an OTLP span exporter, only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set;
//! - W3C trace-context extraction for inbound HTTP requests;
//! - a Prometheus recorder whose text rendering [`serve_metrics`] exposes on
//!   `GET /metrics`.
//!
//! # Metrics
//! | name | labels | emitted by |
//! |------|--------|------------|
//! | `arbiter_gateway_decisions_total` | `decision` | gateway |
//! | `arbiter_gateway_cache_hits_total` | `op` | gateway |
//! | `arbiter_gateway_cache_misses_total` | `op` | gateway |
//! | `arbiter_gateway_timeouts_total` | `op` | gateway |
//! | `arbiter_cache_errors_total` | `op` | gateway, services |
//! | `arbiter_access_decisions_total` | `decision` | evaluator |
//! | `arbiter_group_changes_total` | `op` | stores |
//! | `arbiter_groups_total` | | stores (gauge) |
//! | `arbiter_events_published_total` | | event log |
//!
//! Calling [`init_observability`] again is harmless; tests rely on that.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";
const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

static SUBSCRIBER: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

const COUNTERS: &[(&str, &str)] = &[
    (
        "arbiter_gateway_decisions_total",
        "Channel access answers given by the gateway",
    ),
    (
        "arbiter_gateway_cache_hits_total",
        "Gateway lookups answered from the authorization cache",
    ),
    (
        "arbiter_gateway_cache_misses_total",
        "Gateway lookups that fell through to the store",
    ),
    (
        "arbiter_gateway_timeouts_total",
        "Store calls abandoned after the gateway timeout",
    ),
    (
        "arbiter_cache_errors_total",
        "Authorization cache calls that failed or timed out",
    ),
    (
        "arbiter_access_decisions_total",
        "Evaluator decisions on management requests",
    ),
    ("arbiter_group_changes_total", "Groups created or deleted"),
    (
        "arbiter_events_published_total",
        "Change events appended to the event log",
    ),
];

/// Installs logging, optional trace export and the metrics recorder, and
/// returns the handle that renders the recorder.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    SUBSCRIBER.get_or_init(|| {
        install_propagator();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match span_exporter(service_name) {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });
    metrics_recorder()
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

fn span_exporter(service_name: &str) -> Option<SdkTracerProvider> {
    std::env::var_os(OTLP_ENDPOINT_ENV)?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
    {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("otlp exporter disabled: {err}");
            return None;
        }
    };
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.namespace", "arbiter"),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    let instance = std::env::var("ARBITER_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"));
    if let Ok(instance) = instance {
        attrs.push(KeyValue::new("service.instance.id", instance));
    }
    if let Ok(environment) = std::env::var("ARBITER_ENVIRONMENT") {
        attrs.push(KeyValue::new("deployment.environment", environment));
    }
    attrs
}

/// Parent context carried by `traceparent`/`tracestate`, or an empty one.
pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderCarrier(headers)))
}

struct HeaderCarrier<'a>(&'a axum::http::HeaderMap);

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

fn metrics_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                for (name, help) in COUNTERS {
                    metrics::describe_counter!(*name, *help);
                }
                metrics::describe_gauge!("arbiter_groups_total", "Groups held by the store");
                handle
            }
            Err(err) => {
                // Someone else owns the global recorder; render an empty one.
                tracing::warn!(error = %err, "metrics recorder already installed");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serves `GET /metrics` on `addr` until the task is dropped.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
    use opentelemetry::trace::{TraceContextExt, TraceId};
    use serial_test::serial;
    use tower::ServiceExt;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    /// Restores one environment variable on drop.
    struct ScopedEnv {
        key: &'static str,
        prev: Option<String>,
    }

    impl ScopedEnv {
        fn new(key: &'static str, value: Option<&str>) -> Self {
            let prev = std::env::var(key).ok();
            // Tests touching the environment are serialized.
            unsafe {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
            Self { key, prev }
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            unsafe {
                match &self.prev {
                    Some(value) => std::env::set_var(self.key, value),
                    None => std::env::remove_var(self.key),
                }
            }
        }
    }

    fn attribute(attrs: &[KeyValue], key: &str) -> Option<String> {
        attrs
            .iter()
            .find(|attr| attr.key.as_str() == key)
            .map(|attr| attr.value.to_string())
    }

    #[test]
    #[serial]
    fn resource_names_the_instance_and_environment() {
        let _instance = ScopedEnv::new("ARBITER_INSTANCE_ID", Some("cp-0"));
        let _environment = ScopedEnv::new("ARBITER_ENVIRONMENT", Some("staging"));

        let attrs = resource_attributes("arbiter-controlplane");
        assert_eq!(
            attribute(&attrs, "service.name").as_deref(),
            Some("arbiter-controlplane")
        );
        assert_eq!(attribute(&attrs, "service.namespace").as_deref(), Some("arbiter"));
        assert_eq!(attribute(&attrs, "service.instance.id").as_deref(), Some("cp-0"));
        assert_eq!(
            attribute(&attrs, "deployment.environment").as_deref(),
            Some("staging")
        );
    }

    #[test]
    #[serial]
    fn instance_falls_back_to_hostname() {
        let _instance = ScopedEnv::new("ARBITER_INSTANCE_ID", None);
        let _host = ScopedEnv::new("HOSTNAME", Some("node-7"));
        let _environment = ScopedEnv::new("ARBITER_ENVIRONMENT", None);

        let attrs = resource_attributes("arbiter-controlplane");
        assert_eq!(attribute(&attrs, "service.instance.id").as_deref(), Some("node-7"));
        assert_eq!(attribute(&attrs, "deployment.environment"), None);
    }

    #[test]
    #[serial]
    fn no_exporter_without_an_endpoint() {
        let _endpoint = ScopedEnv::new(OTLP_ENDPOINT_ENV, None);
        assert!(span_exporter("arbiter-controlplane").is_none());
    }

    #[test]
    fn inbound_trace_parent_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static(TRACEPARENT));
        let context = trace_context_from_headers(&headers);
        let span = context.span();
        let span_context = span.span_context();
        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").expect("trace id")
        );

        let context = trace_context_from_headers(&HeaderMap::new());
        assert!(!context.span().span_context().is_valid());
    }

    #[test]
    fn carrier_skips_non_utf8_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "tracestate",
            HeaderValue::from_bytes(b"\xFF").expect("header"),
        );
        headers.insert("traceparent", HeaderValue::from_static(TRACEPARENT));
        let carrier = HeaderCarrier(&headers);
        assert!(carrier.get("tracestate").is_none());
        assert_eq!(carrier.get("traceparent"), Some(TRACEPARENT));
        assert_eq!(carrier.keys().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn metrics_route_renders_gateway_counters() {
        let first = init_observability("arbiter-controlplane-test");
        let handle = init_observability("arbiter-controlplane-test");
        metrics::counter!("arbiter_gateway_decisions_total", "decision" => "allow").increment(1);
        assert!(first.render().contains("arbiter_gateway_decisions_total"));

        let response = metrics_router(handle)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(text.contains("# HELP arbiter_gateway_decisions_total"));
        assert!(text.contains(r#"decision="allow""#));
    }
}

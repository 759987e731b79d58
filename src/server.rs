use crate::config::{AppConfig, HEALTHZ_PATH};
use crate::middleware::{MetloApp, MetloLayer};
use crate::observability::CaptureMetrics;
use crate::sampling::RateSampler;
use crate::trace::MetloTrace;
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Response, StatusCode};
use axum::routing::{any, get};
use axum::{Router, response::IntoResponse};
use http::header::CONTENT_TYPE;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub struct LogSink {
    sampler: RateSampler,
}

impl LogSink {
    pub fn new(traces_per_minute: u64) -> Self {
        Self {
            sampler: RateSampler::new(traces_per_minute),
        }
    }
}

#[async_trait]
impl MetloApp for LogSink {
    fn allow(&self) -> bool {
        self.sampler.allow()
    }

    async fn send(&self, trace: MetloTrace) {
        match serde_json::to_string(&trace) {
            Ok(json) => info!(target: "metlo::trace", trace = %json, "captured trace"),
            Err(err) => warn!(error = %err, "failed to serialize trace"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub metrics: Option<Arc<CaptureMetrics>>,
}

pub fn build_app(config: Arc<AppConfig>) -> Router {
    build_app_with_sink(
        config.clone(),
        Arc::new(LogSink::new(config.sampling.traces_per_minute)),
    )
}

pub fn build_app_with_sink(config: Arc<AppConfig>, app: Arc<dyn MetloApp>) -> Router {
    let metrics_config = config
        .observability
        .as_ref()
        .map(|observability| &observability.metrics)
        .filter(|metrics| metrics.enabled);
    let metrics = metrics_config.map(|_| Arc::new(CaptureMetrics::new()));

    let mut layer = MetloLayer::from_config(app, &config.capture);
    if let Some(metrics) = &metrics {
        layer = layer.with_metrics(metrics.clone());
    }

    let mut router = Router::new().route(HEALTHZ_PATH, get(healthz_handler));
    if let Some(metrics_config) = metrics_config {
        router = router.route(&metrics_config.path, get(metrics_handler));
    }

    router
        .fallback(any(echo_handler))
        .layer(layer)
        .with_state(AppState { metrics })
}

pub async fn run_server(config: Arc<AppConfig>) -> Result<(), String> {
    let listen_addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|err| format!("invalid listen address `{}`: {err}", config.listen))?;
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|err| format!("failed to bind `{listen_addr}`: {err}"))?;

    let app = build_app(config.clone());
    info!(
        listen = %listen_addr,
        destination = %config.capture.server_host,
        environment = %config.capture.environment,
        "metlo capture server listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|err| format!("server error: {err}"))
}

async fn healthz_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        r#"{"status":"ok"}"#,
    )
}

async fn metrics_handler(State(state): State<AppState>) -> Response<Body> {
    let Some(metrics) = &state.metrics else {
        return json_error(StatusCode::NOT_FOUND, "metrics_disabled");
    };
    let mut response = Response::new(Body::from(metrics.encode()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    response
}

async fn echo_handler(headers: HeaderMap, body: Bytes) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, content_type.clone());
    }
    response
}

fn json_error(status: StatusCode, code: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(format!(r#"{{"error":"{code}"}}"#)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::build_app;
    use crate::config::{
        AppConfig, CaptureConfig, MetricsConfig, ObservabilityConfig, SamplingConfig,
    };
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = build_app(Arc::new(test_config(false)));
        let request = Request::builder()
            .method(Method::GET)
            .uri("/healthz")
            .body(Body::empty())
            .expect("request should build");

        let response = app.oneshot(request).await.expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn echo_returns_request_body() {
        let app = build_app(Arc::new(test_config(false)));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/anything/here?x=1")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"a":1}"#))
            .expect("request should build");

        let response = app.oneshot(request).await.expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok()),
            Some("application/json")
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        assert_eq!(&body[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn metrics_route_reports_sampled_requests() {
        let app = build_app(Arc::new(test_config(true)));
        let warmup = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(warmup)
            .await
            .expect("request should succeed");
        to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .expect("request should build");
        let response = app.oneshot(request).await.expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let text = String::from_utf8(body.to_vec()).expect("metrics should be utf8");
        assert!(text.contains("metlo_traces_sampled_total 1"));
    }

    fn test_config(metrics: bool) -> AppConfig {
        AppConfig {
            listen: "127.0.0.1:8080".to_string(),
            capture: CaptureConfig::default(),
            sampling: SamplingConfig {
                traces_per_minute: 100,
            },
            observability: Some(ObservabilityConfig {
                metrics: MetricsConfig {
                    enabled: metrics,
                    path: "/metrics".to_string(),
                },
                ..Default::default()
            }),
        }
    }
}

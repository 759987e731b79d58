use crate::capture::{CaptureBody, CaptureBuffer};
use crate::config::CaptureConfig;
use crate::endpoint::{Destination, resolve_endpoints};
use crate::observability::CaptureMetrics;
use crate::trace::{CapturedResponse, MetloTrace, RequestSnapshot, assemble};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::BodyExt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

#[async_trait]
pub trait MetloApp: Send + Sync + 'static {
    fn allow(&self) -> bool;

    async fn send(&self, trace: MetloTrace);
}

#[derive(Clone)]
pub struct MetloLayer {
    app: Arc<dyn MetloApp>,
    config: Arc<CaptureConfig>,
    metrics: Option<Arc<CaptureMetrics>>,
}

impl MetloLayer {
    pub fn init(app: Arc<dyn MetloApp>) -> Self {
        Self::custom_init(app, "localhost", 0)
    }

    pub fn custom_init(
        app: Arc<dyn MetloApp>,
        server_host: impl Into<String>,
        server_port: u16,
    ) -> Self {
        let config = CaptureConfig {
            server_host: server_host.into(),
            server_port,
            ..CaptureConfig::default()
        };
        Self::from_config(app, &config)
    }

    pub fn from_config(app: Arc<dyn MetloApp>, config: &CaptureConfig) -> Self {
        Self {
            app,
            config: Arc::new(config.clone()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CaptureMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn complete(&self, snapshot: RequestSnapshot, response: Response<Body>) -> Response<Body> {
        if !self.app.allow() {
            debug!(
                method = %snapshot.method,
                path = snapshot.uri.path(),
                "trace dropped by sampler"
            );
            if let Some(metrics) = &self.metrics {
                metrics.observe_dropped();
            }
            return response;
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_sampled();
        }

        let (parts, body) = response.into_parts();
        let status = parts.status;
        let headers = parts.headers.clone();
        let dispatcher = self.clone();
        let body = CaptureBody::new(body, self.config.max_body_bytes, move |captured| {
            dispatcher.dispatch(snapshot, status, headers, captured);
        });
        Response::from_parts(parts, Body::new(body))
    }

    fn dispatch(
        &self,
        snapshot: RequestSnapshot,
        status: StatusCode,
        headers: HeaderMap,
        captured: CaptureBuffer,
    ) {
        if captured.is_truncated() {
            debug!(cap = captured.cap(), "captured response body truncated");
            if let Some(metrics) = &self.metrics {
                metrics.observe_truncated();
            }
        }

        let destination = Destination {
            host: self.config.server_host.clone(),
            port: self.config.server_port,
        };
        let endpoints = resolve_endpoints(
            snapshot.peer_addr.as_deref(),
            &snapshot.headers,
            self.config.trust_forwarded_headers,
            &destination,
        );
        let response = CapturedResponse {
            status,
            headers,
            body: captured.into_bytes(),
        };
        let trace = assemble(&snapshot, &response, endpoints, &self.config.environment);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, dropping trace");
            return;
        };
        let app = self.app.clone();
        runtime.spawn(async move {
            app.send(trace).await;
        });
        if let Some(metrics) = &self.metrics {
            metrics.observe_dispatched(status);
        }
    }
}

impl<S> Layer<S> for MetloLayer {
    type Service = MetloService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetloService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetloService<S> {
    inner: S,
    layer: MetloLayer,
}

impl<S> Service<Request<Body>> for MetloService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);
        let layer = self.layer.clone();

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let body = read_request_body(body).await;

            let peer_addr = parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string());
            let snapshot = RequestSnapshot::from_parts(&parts, body.clone(), peer_addr);

            let request = Request::from_parts(parts, Body::from(body));
            let response = inner.call(request).await?;
            Ok(layer.complete(snapshot, response))
        })
    }
}

// A failed read keeps the bytes received so far; the inner service still runs.
async fn read_request_body(mut body: Body) -> Bytes {
    let mut bytes = Vec::new();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(data) = frame.data_ref() {
                    bytes.extend_from_slice(data);
                }
            }
            Err(err) => {
                warn!(
                    error = %err,
                    received = bytes.len(),
                    "failed to read request body"
                );
                break;
            }
        }
    }
    Bytes::from(bytes)
}

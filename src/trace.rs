use crate::endpoint::ResolvedEndpoints;
use crate::normalize::{NameValue, normalize_headers, normalize_query};
use axum::body::Bytes;
use http::header::HOST;
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::Serialize;

pub const METLO_SOURCE: &str = "rust/axum";
pub const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceUrl {
    pub host: String,
    pub path: String,
    pub parameters: Vec<NameValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRequest {
    pub url: TraceUrl,
    pub headers: Vec<NameValue>,
    pub body: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<NameValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMeta {
    pub environment: String,
    pub incoming: bool,
    pub source: String,
    pub source_port: u16,
    pub destination: String,
    pub destination_port: u16,
    pub metlo_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetloTrace {
    pub request: TraceRequest,
    pub response: TraceResponse,
    pub meta: TraceMeta,
}

#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer_addr: Option<String>,
}

impl RequestSnapshot {
    pub fn from_parts(parts: &Parts, body: Bytes, peer_addr: Option<String>) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            body,
            peer_addr,
        }
    }

    pub fn host(&self) -> String {
        self.headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
            .or_else(|| self.uri.authority().map(ToString::to_string))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub fn assemble(
    request: &RequestSnapshot,
    response: &CapturedResponse,
    endpoints: ResolvedEndpoints,
    environment: &str,
) -> MetloTrace {
    MetloTrace {
        request: TraceRequest {
            url: TraceUrl {
                host: request.host(),
                path: request.uri.path().to_string(),
                parameters: normalize_query(request.uri.query()),
            },
            headers: normalize_headers(&request.headers),
            body: String::from_utf8_lossy(&request.body).into_owned(),
            method: request.method.as_str().to_string(),
        },
        response: TraceResponse {
            status: response.status.as_u16(),
            body: String::from_utf8_lossy(&response.body).into_owned(),
            headers: normalize_headers(&response.headers),
        },
        meta: TraceMeta {
            environment: environment.to_string(),
            incoming: true,
            source: endpoints.source,
            source_port: endpoints.source_port,
            destination: endpoints.destination,
            destination_port: endpoints.destination_port,
            metlo_source: METLO_SOURCE.to_string(),
        },
    }
}

//! Admission Webhook Server
//!
//! Serves `/mutate/<plural>` and `/validate/<plural>` for every topology
//! kind. The API server calls the mutating endpoint first, then the
//! validating one.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::{
    extract::{self, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use opentelemetry::{global, propagation::Extractor};
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::mutation::{mutate, Mutation};
use super::validation::{review, Verdict};
use crate::crd::{
    Binding, Exchange, Federation, Permission, Policy, Queue, SchemaReplication, Shovel,
    SuperStream, User, Vhost,
};
use crate::error::{Error, Result};

struct HeaderExtractor<'a>(&'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v: &HeaderValue| v.to_str().ok())
    }
    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k: &HeaderName| k.as_str()).collect()
    }
}

async fn extract_trace_context(request: Request, next: Next) -> Response {
    let parent_cx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(request.headers()))
    });
    tracing::Span::current().set_parent(parent_cx);
    next.run(request).await
}

/// Call `$f::<Kind>($args)` for the kind served under `$plural`.
macro_rules! for_kind {
    ($plural:expr, $f:ident($($arg:expr),*)) => {
        match $plural {
            "queues" => Ok($f::<Queue>($($arg),*)),
            "exchanges" => Ok($f::<Exchange>($($arg),*)),
            "bindings" => Ok($f::<Binding>($($arg),*)),
            "vhosts" => Ok($f::<Vhost>($($arg),*)),
            "users" => Ok($f::<User>($($arg),*)),
            "permissions" => Ok($f::<Permission>($($arg),*)),
            "policies" => Ok($f::<Policy>($($arg),*)),
            "shovels" => Ok($f::<Shovel>($($arg),*)),
            "federations" => Ok($f::<Federation>($($arg),*)),
            "schemareplications" => Ok($f::<SchemaReplication>($($arg),*)),
            "superstreams" => Ok($f::<SuperStream>($($arg),*)),
            other => Err(Error::WebhookError(format!("unsupported resource '{other}'"))),
        }
    };
}

/// TLS configuration for the webhook server
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    /// `tls.crt` and `tls.key` inside `dir`, as mounted from a
    /// cert-manager secret.
    pub fn from_cert_dir(dir: &Path) -> Self {
        Self {
            cert_path: dir.join("tls.crt"),
            key_path: dir.join("tls.key"),
        }
    }
}

/// Webhook server
#[derive(Clone, Debug, Default)]
pub struct WebhookServer {
    tls_config: Option<TlsConfig>,
}

impl WebhookServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure TLS
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls_config = Some(tls);
        self
    }

    pub fn router() -> Router {
        Router::new()
            .route("/healthz", get(health_handler))
            .route("/mutate/{plural}", post(mutate_handler))
            .route("/validate/{plural}", post(validate_handler))
            .layer(middleware::from_fn(extract_trace_context))
            .layer(tower_http::trace::TraceLayer::new_for_http())
    }

    /// Start the webhook server
    pub async fn start(self, addr: SocketAddr) -> Result<()> {
        let app = Self::router();
        info!("Starting webhook server on {}", addr);

        match self.tls_config {
            Some(tls) => {
                let config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    &tls.cert_path,
                    &tls.key_path,
                )
                .await
                .map_err(|e| {
                    Error::WebhookError(format!(
                        "Failed to load TLS certificate from {}: {e}",
                        tls.cert_path.display()
                    ))
                })?;
                axum_server::bind_rustls(addr, config)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| Error::WebhookError(format!("Server error: {e}")))
            }
            None => {
                warn!("No TLS configuration, serving admission requests over plain HTTP");
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .map_err(|e| Error::WebhookError(format!("Failed to bind to {addr}: {e}")))?;
                axum::serve(listener, app)
                    .await
                    .map_err(|e| Error::WebhookError(format!("Server error: {e}")))
            }
        }
    }
}

// HTTP Handlers

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

type ReviewResponse = (StatusCode, Json<AdmissionReview<DynamicObject>>);

fn parse(
    body: AdmissionReview<DynamicObject>,
) -> std::result::Result<AdmissionRequest<DynamicObject>, ReviewResponse> {
    body.try_into().map_err(|e| {
        error!("Failed to parse admission request: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(AdmissionResponse::invalid(format!("Invalid admission request: {e}")).into_review()),
        )
    })
}

fn raw(object: Option<&DynamicObject>) -> Option<Value> {
    object.and_then(|o| serde_json::to_value(o).ok())
}

#[instrument(skip(body))]
async fn mutate_handler(
    extract::Path(plural): extract::Path<String>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> ReviewResponse {
    let req = match parse(body) {
        Ok(req) => req,
        Err(response) => return response,
    };
    let namespace = req.namespace.clone().unwrap_or_default();
    let Some(object) = raw(req.object.as_ref()) else {
        return (StatusCode::OK, Json(AdmissionResponse::from(&req).into_review()));
    };

    let response = match for_kind!(plural.as_str(), mutate(&object, &namespace)) {
        Ok(Ok(Mutation { patch, warnings })) => {
            let response = AdmissionResponse::from(&req);
            let response = if patch.0.is_empty() {
                Ok(response)
            } else {
                response.with_patch(patch)
            };
            match response {
                Ok(mut response) => {
                    if !warnings.is_empty() {
                        response.warnings = Some(warnings);
                    }
                    response
                }
                Err(e) => {
                    error!("Failed to serialize patch: {}", e);
                    AdmissionResponse::from(&req).deny(format!("Mutation failed: {e}"))
                }
            }
        }
        Ok(Err(e)) => AdmissionResponse::from(&req).deny(format!("Mutation failed: {e}")),
        Err(e) => AdmissionResponse::from(&req).deny(e.to_string()),
    };
    (StatusCode::OK, Json(response.into_review()))
}

#[instrument(skip(body))]
async fn validate_handler(
    extract::Path(plural): extract::Path<String>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> ReviewResponse {
    let req = match parse(body) {
        Ok(req) => req,
        Err(response) => return response,
    };
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return (StatusCode::OK, Json(AdmissionResponse::from(&req).into_review()));
    }
    let namespace = req.namespace.clone().unwrap_or_default();
    let Some(object) = raw(req.object.as_ref()) else {
        return (StatusCode::OK, Json(AdmissionResponse::from(&req).into_review()));
    };
    let old_object = raw(req.old_object.as_ref());

    let verdict = for_kind!(
        plural.as_str(),
        review(&object, old_object.as_ref(), &namespace)
    );
    let response = match verdict {
        Ok(verdict) => respond(&req, verdict),
        Err(e) => AdmissionResponse::from(&req).deny(e.to_string()),
    };
    (StatusCode::OK, Json(response.into_review()))
}

fn respond(req: &AdmissionRequest<DynamicObject>, verdict: Verdict) -> AdmissionResponse {
    info!(
        "Validation result for {}: allowed={}",
        req.name,
        verdict.allowed()
    );
    let mut response = if verdict.allowed() {
        AdmissionResponse::from(req)
    } else {
        AdmissionResponse::from(req).deny(verdict.message())
    };
    if !verdict.warnings.is_empty() {
        response.warnings = Some(verdict.warnings);
    }
    response
}

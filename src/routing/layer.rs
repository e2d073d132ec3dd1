use super::{resolve_route, RouteDecision};
use crate::error::TenancyError;
use crate::registry::RegistryHandle;
use crate::schema::context;
use crate::telemetry::tenant_span;
use axum::{
    body::Body,
    http::{header, uri::PathAndQuery, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{debug, Instrument};

/// Activates the tenant schema matching the request's host (and folder)
/// for the duration of the inner service call.
#[derive(Clone)]
pub struct SchemaRoutingLayer {
    registry: RegistryHandle,
}

impl SchemaRoutingLayer {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for SchemaRoutingLayer {
    type Service = SchemaRoutingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SchemaRoutingService {
            inner,
            registry: self.registry.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SchemaRoutingService<S> {
    inner: S,
    registry: RegistryHandle,
}

impl<S> Service<Request<Body>> for SchemaRoutingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let registry = self.registry.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let host = request_host(&req);
            let snapshot = registry.snapshot().await;

            match resolve_route(&snapshot, &host, req.uri().path()) {
                RouteDecision::Tenant {
                    schema,
                    strip_prefix,
                } => {
                    if let Some(prefix) = strip_prefix {
                        let stripped = strip_uri_prefix(req.uri(), &prefix);
                        *req.uri_mut() = stripped;
                    }
                    debug!("Routing {} {} to schema {}", host, req.uri().path(), schema);

                    let span = tenant_span(&schema);
                    // Each request is its own execution unit.
                    context::scope(None, async move {
                        let _guard = match schema.enter() {
                            Ok(guard) => guard,
                            Err(e) => return Ok(e.into_response()),
                        };
                        inner.call(req).await
                    })
                    .instrument(span)
                    .await
                }
                RouteDecision::Redirect(location) => Ok(redirect_permanent(&location)),
                RouteDecision::NotFound { hostname } => {
                    Ok(TenancyError::TenantNotFound { hostname }.into_response())
                }
            }
        })
    }
}

fn request_host(req: &Request<Body>) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or_default()
        .to_string()
}

fn strip_uri_prefix(uri: &Uri, prefix: &str) -> Uri {
    let path = super::strip_tenant_prefix(uri.path(), prefix);
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = PathAndQuery::try_from(path_and_query).ok();
    Uri::from_parts(parts).unwrap_or_else(|_| uri.clone())
}

fn redirect_permanent(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response(),
        Err(_) => TenancyError::Internal(format!("Invalid redirect location: {}", location)).into_response(),
    }
}

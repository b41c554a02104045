//! Correlation IDs for request tracing.
//!
//! Every request gets an ID, taken from the `X-Correlation-ID` header when
//! the caller sent a valid UUID, generated otherwise. The ID is:
//!
//! 1. stored in the request extensions, where handlers read it through the
//!    [`CorrelationId`] extractor
//! 2. recorded on an `http_request` span wrapping the handler, so gate logs
//!    carry it
//! 3. echoed back in the response header

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{HeaderValue, request::Parts},
    response::Response,
};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    fn from_header(value: Option<&HeaderValue>) -> Self {
        Self(
            value
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::new_v4),
        )
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    /// Reads the ID stored by [`correlation_id_layer`], falling back to the
    /// header when the layer is not installed.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Self>()
            .copied()
            .unwrap_or_else(|| Self::from_header(parts.headers.get(CORRELATION_ID_HEADER))))
    }
}

/// Create a layer that adds correlation ID tracking to all requests.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Copy, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let id = CorrelationId::from_header(req.headers().get(CORRELATION_ID_HEADER));
        req.extensions_mut().insert(id);

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %id.0,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let fut = self.inner.call(req);
        Box::pin(async move {
            let mut response = fut.instrument(span).await?;
            if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}

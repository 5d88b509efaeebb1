//! Generic request dispatcher.
//!
//! [`Dispatcher`] turns a typed handler `(RequestContext, I) -> ApiResult<O>`
//! into a `tower::Service` over HTTP requests. Every endpoint gets the same
//! pipeline:
//!
//! 1. **Decode** -- query string when any query parameter is present,
//!    otherwise the JSON body. An empty body yields `I::default()`.
//! 2. **Invoke** -- the handler runs behind a panic boundary; a panic
//!    becomes an `Internal` error instead of unwinding into the server.
//! 3. **Respond** -- the result is classified and written inside the
//!    `{statusCode, body}` envelope.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info_span, warn, Instrument};
use vsock_proxy_core::{ApiError, ApiResult, Envelope};

use crate::network::REQUEST_ID_HEADER;

/// Default request body limit (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Request-scoped context handed to every handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifier assigned by the request-id middleware, if present.
    pub request_id: Option<String>,
    pub method: Method,
    pub path: String,
}

impl RequestContext {
    fn from_request(request: &Request) -> Self {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Self {
            request_id,
            method: request.method().clone(),
            path: request.uri().path().to_string(),
        }
    }
}

/// A typed business handler.
///
/// Implemented for every `Fn(RequestContext, I) -> Future<Output = ApiResult<O>>`
/// that is cheap to clone, so plain `async fn`s and closures capturing an
/// `Arc` of their collaborators both qualify.
pub trait ApiHandler<I, O>: Clone + Send + Sync + 'static {
    type Future: Future<Output = ApiResult<O>> + Send;

    fn call(&self, ctx: RequestContext, input: I) -> Self::Future;
}

impl<F, Fut, I, O> ApiHandler<I, O> for F
where
    F: Fn(RequestContext, I) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<O>> + Send,
{
    type Future = Fut;

    fn call(&self, ctx: RequestContext, input: I) -> Self::Future {
        self(ctx, input)
    }
}

/// Wraps an [`ApiHandler`] into a transport-agnostic request service.
pub struct Dispatcher<H, I, O> {
    handler: H,
    max_body_bytes: usize,
    _types: PhantomData<fn(I) -> O>,
}

impl<H, I, O> Dispatcher<H, I, O>
where
    H: ApiHandler<I, O>,
    I: DeserializeOwned + Default + Send + 'static,
    O: Serialize + Send + 'static,
{
    /// Creates a dispatcher with the default body limit.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            _types: PhantomData,
        }
    }

    /// Overrides the request body size limit.
    #[must_use]
    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Runs the decode / invoke / respond pipeline for one request.
    pub async fn dispatch(&self, request: Request) -> Response {
        let ctx = RequestContext::from_request(&request);
        let span = info_span!(
            "api_request",
            request_id = ctx.request_id.as_deref().unwrap_or_default(),
            method = %ctx.method,
            path = %ctx.path,
        );

        async move {
            let outcome = match decode_input::<I>(request, self.max_body_bytes).await {
                Ok(input) => invoke_with_panic_recovery(self.handler.clone(), ctx, input).await,
                Err(err) => Err(err),
            };
            respond(outcome)
        }
        .instrument(span)
        .await
    }
}

impl<H: Clone, I, O> Clone for Dispatcher<H, I, O> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            max_body_bytes: self.max_body_bytes,
            _types: PhantomData,
        }
    }
}

impl<H, I, O> fmt::Debug for Dispatcher<H, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("input", &std::any::type_name::<I>())
            .field("output", &std::any::type_name::<O>())
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl<H, I, O> tower::Service<Request> for Dispatcher<H, I, O>
where
    H: ApiHandler<I, O>,
    I: DeserializeOwned + Default + Send + 'static,
    O: Serialize + Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatch(request).await) })
    }
}

/// Whether the URI carries at least one query parameter.
fn has_query_params(uri: &Uri) -> bool {
    uri.query()
        .is_some_and(|query| query.split('&').any(|pair| !pair.is_empty()))
}

/// Decodes the handler input.
///
/// Query parameters take precedence over the body whenever any are present,
/// regardless of method. Only the first JSON value of the body is read, and a
/// body holding nothing but whitespace, or a bare `null`, decodes to
/// `I::default()`. Unknown body fields are ignored.
async fn decode_input<I>(request: Request, max_body_bytes: usize) -> ApiResult<I>
where
    I: DeserializeOwned + Default,
{
    if has_query_params(request.uri()) {
        let query = request.uri().query().unwrap_or_default();
        return decode_query(query);
    }

    let bytes = axum::body::to_bytes(request.into_body(), max_body_bytes)
        .await
        .map_err(|e| ApiError::bad_request(format!("reading request body: {e}")))?;

    match serde_json::Deserializer::from_slice(&bytes)
        .into_iter::<Option<I>>()
        .next()
    {
        Some(Ok(Some(input))) => Ok(input),
        Some(Ok(None)) | None => Ok(I::default()),
        Some(Err(e)) => Err(ApiError::bad_request(e.to_string())),
    }
}

/// Decodes `I` from a query string.
///
/// A repeated key keeps its last value. A key the input type does not
/// consume is rejected, naming the key.
fn decode_query<I: DeserializeOwned>(query: &str) -> ApiResult<I> {
    let mut pairs: Vec<(Cow<'_, str>, Cow<'_, str>)> = Vec::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match pairs.iter_mut().find(|(seen, _)| *seen == key) {
            Some(slot) => slot.1 = value,
            None => pairs.push((key, value)),
        }
    }
    let collapsed = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&pairs)
        .finish();

    let mut unknown: Option<String> = None;
    let deserializer =
        serde_urlencoded::Deserializer::new(form_urlencoded::parse(collapsed.as_bytes()));
    let input = serde_ignored::deserialize(deserializer, |path| {
        if unknown.is_none() {
            unknown = Some(match path {
                serde_ignored::Path::Map { key, .. } => key,
                _ => String::new(),
            });
        }
    })
    .map_err(|e| ApiError::bad_request(format!("Failed to deserialize query string: {e}")))?;

    match unknown {
        None => Ok(input),
        // The whole input was ignored (e.g. `IgnoredAny`): blame the first key.
        Some(key) if key.is_empty() => {
            let first = pairs.first().map(|(key, _)| key.as_ref()).unwrap_or_default();
            Err(ApiError::bad_request(format!("unknown query parameter {first:?}")))
        }
        Some(key) => Err(ApiError::bad_request(format!("unknown query parameter {key:?}"))),
    }
}

/// Calls the handler, converting a panic anywhere in it into an `Internal`
/// error.
async fn invoke_with_panic_recovery<H, I, O>(
    handler: H,
    ctx: RequestContext,
    input: I,
) -> ApiResult<O>
where
    H: ApiHandler<I, O>,
{
    let call = async move { handler.call(ctx, input).await };
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "recovering from panic in http handler");
            Err(ApiError::internal(format!("panic: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

/// Classifies the handler outcome and builds the enveloped response.
fn respond<O: Serialize>(outcome: ApiResult<O>) -> Response {
    let err = match outcome {
        Ok(output) => return encode(StatusCode::OK, &Envelope::ok(output)),
        Err(err) => err,
    };
    match &err {
        ApiError::BadRequest(reason) => warn!(reason = %reason, "invalid request detected"),
        ApiError::NotFound(reason) => warn!(reason = %reason, "requested resource not found"),
        ApiError::Internal(cause) => {
            let detail = format!("{cause:#}");
            error!(error = %detail, "error handling request");
        }
    }
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    encode(status, &Envelope::error(err.status_code(), err.reason()))
}

/// Enveloped error response for layers that answer on the dispatcher's
/// behalf, such as the write timeout.
pub(crate) fn error_response(status: StatusCode, reason: &str) -> Response {
    encode(status, &Envelope::error(status.as_u16(), reason))
}

/// Serialises the envelope. A serialisation failure is logged and leaves the
/// status untouched with an empty body.
fn encode<T: Serialize>(status: StatusCode, envelope: &Envelope<T>) -> Response {
    match serde_json::to_vec(envelope) {
        Ok(bytes) => {
            let mut response = (status, Body::from(bytes)).into_response();
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!(error = %e, status = status.as_u16(), "error encoding response");
            status.into_response()
        }
    }
}

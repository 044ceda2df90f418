use crate::errors::GatewayError;
use crate::params::Params;
use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Method, Request, Response};
use serde_json::Value as JsonValue;

pub type HandlerResponse = Response<BoxBody<Bytes, GatewayError>>;

/// An endpoint the router can dispatch to.
///
/// Requests arrive with their body fully buffered. Handlers map every failure
/// to a response themselves, so `handle` is infallible.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Methods outside this list are answered with 405 by the router.
    fn allowed_methods(&self) -> &'static [Method];

    async fn handle(&self, request: Request<Bytes>) -> HandlerResponse;
}

/// Query parameters, overlaid by the fields of a JSON object body on POST.
/// Bodies that are not a JSON object are ignored.
pub fn request_params(request: &Request<Bytes>) -> Params {
    let mut params = Params::from_query(request.uri().query());
    if request.method() == Method::POST
        && let Ok(JsonValue::Object(body)) = serde_json::from_slice(request.body())
    {
        params.merge(body);
    }
    params
}

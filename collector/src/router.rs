use crate::api::HandlerContext;
use crate::config::Route;
use crate::handler::{Handler, HandlerResponse};
use hyper::body::Bytes;
use hyper::header::{ALLOW, HeaderValue};
use hyper::{Request, StatusCode};
use serde_json::json;
use shared::http::{make_json_error, make_json_response};
use std::sync::Arc;

/// Label used for requests no route matched.
pub const UNMATCHED: &str = "unmatched";

/// Router that matches incoming requests against configured routes
#[derive(Clone)]
pub struct Router {
    routes: Arc<Vec<(String, Arc<dyn Handler>)>>,
}

impl Router {
    /// Builds one handler per configured route
    pub fn new(routes: &[Route], context: &HandlerContext) -> Self {
        Self::from_handlers(
            routes
                .iter()
                .map(|route| (route.path.clone(), context.make_handler(route.handler)))
                .collect(),
        )
    }

    pub fn from_handlers(routes: Vec<(String, Arc<dyn Handler>)>) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }

    /// Routes a request to its handler. Returns the handler name alongside the
    /// response for tagging.
    pub async fn route(&self, req: Request<Bytes>) -> (&'static str, HandlerResponse) {
        let Some(handler) = self.find_handler(req.uri().path()) else {
            tracing::debug!(
                method = %req.method(),
                path = %req.uri().path(),
                "No route matched"
            );
            return (UNMATCHED, make_json_error(StatusCode::NOT_FOUND, "Not Found"));
        };

        if !handler.allowed_methods().contains(req.method()) {
            return (handler.name(), method_not_allowed(handler.as_ref()));
        }

        tracing::debug!(handler = handler.name(), "Matched route");
        (handler.name(), handler.handle(req).await)
    }

    fn find_handler(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.routes
            .iter()
            .find(|(route_path, _)| route_path == path)
            .map(|(_, handler)| handler.clone())
    }
}

fn method_not_allowed(handler: &dyn Handler) -> HandlerResponse {
    let methods: Vec<&str> = handler.allowed_methods().iter().map(|m| m.as_str()).collect();
    let mut response = make_json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({
            "error": "Method Not Allowed",
            "allowedMethods": methods,
        }),
    );
    if let Ok(allow) = HeaderValue::from_str(&methods.join(", ")) {
        response.headers_mut().insert(ALLOW, allow);
    }
    response
}

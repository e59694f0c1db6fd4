// Route registry and dispatch
//
// Keys are exact (path, method) pairs. Registering an existing key replaces
// the previous handler. Lookups that miss produce a 404 response.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use futures::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::errors::ServiceError;

/// HTTP methods a route can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Map a wire method; `None` for verbs routes cannot be registered for
    pub fn from_http(method: &axum::http::Method) -> Option<Self> {
        method.as_str().parse().ok()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(ServiceError::configuration(format!(
                "unrecognized HTTP method: {:?}",
                other
            ))),
        }
    }
}

/// Exact-match route key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub path: String,
    pub method: Method,
}

impl RouteKey {
    /// Validate and build a key; paths must be non-empty and start with '/'
    pub fn new(path: impl Into<String>, method: Method) -> Result<Self, ServiceError> {
        let path = path.into();
        if path.is_empty() {
            return Err(ServiceError::configuration("route path must not be empty"));
        }
        if !path.starts_with('/') {
            return Err(ServiceError::configuration(format!(
                "route path must start with '/': {:?}",
                path
            )));
        }
        Ok(Self { path, method })
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Incoming request as handed over by the listener
///
/// `query` holds the percent-decoded query parameters; the listener decodes
/// them before dispatch.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ServiceRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a decoded query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// Outgoing response returned to the listener
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ServiceResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.body = Bytes::from(body.into());
        response
    }

    /// Serialize `value` as a JSON body; falls back to a 500 if it cannot be encoded
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut response = Self::new(status);
                response.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                response.body = Bytes::from(body);
                response
            }
            Err(e) => Self::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode response: {}", e),
            ),
        }
    }

    /// 307 redirect to `location`
    pub fn redirect(location: &str) -> Self {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                let mut response = Self::new(StatusCode::TEMPORARY_REDIRECT);
                response.headers.insert(header::LOCATION, value);
                response
            }
            Err(_) => Self::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "invalid redirect location",
            ),
        }
    }

    pub fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, "not found")
    }
}

/// Request handler capability
pub type Handler = Arc<dyn Fn(ServiceRequest) -> BoxFuture<'static, ServiceResponse> + Send + Sync>;

/// Mapping from (path, method) to handler
#[derive(Default, Clone)]
pub struct RouteRegistry {
    routes: HashMap<RouteKey, Handler>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the handler for (path, method)
    pub fn insert<F>(&mut self, path: &str, method: Method, handler: F) -> Result<(), ServiceError>
    where
        F: Fn(&ServiceRequest) -> ServiceResponse + Send + Sync + 'static,
    {
        let handler: Handler =
            Arc::new(move |request: ServiceRequest| future::ready(handler(&request)).boxed());
        self.insert_handler(RouteKey::new(path, method)?, handler);
        Ok(())
    }

    /// Add or replace an asynchronous handler for (path, method)
    pub fn insert_async<F, Fut>(
        &mut self,
        path: &str,
        method: Method,
        handler: F,
    ) -> Result<(), ServiceError>
    where
        F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResponse> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |request: ServiceRequest| handler(request).boxed());
        self.insert_handler(RouteKey::new(path, method)?, handler);
        Ok(())
    }

    pub fn insert_handler(&mut self, key: RouteKey, handler: Handler) {
        if self.routes.insert(key.clone(), handler).is_some() {
            debug!(route = %key, "Replaced existing route handler");
        } else {
            debug!(route = %key, "Registered route");
        }
    }

    pub fn get(&self, path: &str, method: Method) -> Option<&Handler> {
        self.routes.get(&RouteKey {
            path: path.to_string(),
            method,
        })
    }

    pub fn contains(&self, path: &str, method: Method) -> bool {
        self.get(path, method).is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered keys, sorted by path then method
    pub fn keys(&self) -> Vec<RouteKey> {
        let mut keys: Vec<RouteKey> = self.routes.keys().cloned().collect();
        keys.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.method.as_str().cmp(b.method.as_str()))
        });
        keys
    }
}

impl fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRegistry")
            .field("routes", &self.keys())
            .finish()
    }
}

/// Frozen registry shared with the listener while serving
#[derive(Clone, Debug)]
pub struct Dispatcher {
    routes: Arc<RouteRegistry>,
}

impl Dispatcher {
    pub fn new(routes: RouteRegistry) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }

    pub fn routes(&self) -> &RouteRegistry {
        &self.routes
    }

    /// Invoke the handler for the request's key, or answer 404
    pub async fn dispatch(&self, request: ServiceRequest) -> ServiceResponse {
        let method = request.method;
        let path = request.path.clone();
        let response = match self.routes.get(&path, method) {
            Some(handler) => handler(request).await,
            None => ServiceResponse::not_found(),
        };
        debug!(
            method = %method,
            path = %path,
            status = response.status.as_u16(),
            "Dispatched request"
        );
        response
    }
}

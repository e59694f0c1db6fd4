// Listener capability and the axum-backed implementation
//
// The service only needs three things from a transport: open an endpoint,
// feed its requests to a dispatcher, and close when told to.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::routes::{Dispatcher, Method, ServiceRequest, ServiceResponse};
use crate::errors::ServiceError;

/// Largest request body handed to a handler
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Opens listening endpoints
#[async_trait]
pub trait Listener: Send + Sync {
    /// Bind `address:port`; failures are reported as [`ServiceError::Bind`]
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn ListenerHandle>, ServiceError>;
}

/// A bound endpoint, owned by the service that opened it
#[async_trait]
pub trait ListenerHandle: Send {
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Dispatch requests until `shutdown` fires, then close the endpoint
    async fn serve(
        self: Box<Self>,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), ServiceError>;
}

/// HTTP/1.1 listener built on axum and tokio
#[derive(Debug, Default, Clone)]
pub struct AxumListener;

impl AxumListener {
    pub fn new() -> Self {
        Self
    }

    /// Router that hands every request to `dispatcher`
    pub fn router(dispatcher: Dispatcher) -> Router {
        Router::new()
            .fallback(dispatch_request)
            .with_state(dispatcher)
            .layer(TraceLayer::new_for_http())
    }
}

#[async_trait]
impl Listener for AxumListener {
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn ListenerHandle>, ServiceError> {
        let listener = TcpListener::bind((address, port))
            .await
            .map_err(|source| ServiceError::Bind {
                address: format!("{}:{}", address, port),
                source,
            })?;
        let local_addr = listener.local_addr().ok();
        debug!(?local_addr, "Listener bound");

        Ok(Box::new(AxumHandle {
            listener,
            local_addr,
        }))
    }
}

struct AxumHandle {
    listener: TcpListener,
    local_addr: Option<SocketAddr>,
}

#[async_trait]
impl ListenerHandle for AxumHandle {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn serve(
        self: Box<Self>,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), ServiceError> {
        let AxumHandle {
            listener,
            local_addr,
        } = *self;
        let app = AxumListener::router(dispatcher);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(ServiceError::Listener)?;

        info!(?local_addr, "Listener closed");
        Ok(())
    }
}

/// Convert the wire request and run it through the frozen registry
async fn dispatch_request(State(dispatcher): State<Dispatcher>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let Some(method) = Method::from_http(&parts.method) else {
        return ServiceResponse::not_found().into_response();
    };

    let Query(query) = match Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
        Ok(query) => query,
        Err(rejection) => return rejection.into_response(),
    };

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let request = ServiceRequest {
        method,
        path: parts.uri.path().to_string(),
        query,
        headers: parts.headers,
        body,
    };

    dispatcher.dispatch(request).await.into_response()
}

impl IntoResponse for ServiceResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

// Gateway routes hosted by the daemon
//
// GET /health reports liveness. GET / redirects browsers to the desktop or
// mobile UI: an explicit ?target= wins, otherwise the User-Agent decides.
// GET /auth/login, GET /auth/callback and GET /me forward to the auth service.

use axum::body::Bytes;
use axum::http::{header, HeaderValue, StatusCode};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::routes::{Method, RouteRegistry, ServiceRequest, ServiceResponse};
use super::RouteSetup;
use crate::config::ServerConfig;
use crate::errors::ServiceError;

const MOBILE_AGENT_HINTS: [&str; 3] = ["mobile", "android", "iphone"];
const UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub uptime_seconds: u64,
}

/// Route table of the edge gateway
#[derive(Debug, Clone)]
pub struct GatewayRoutes {
    web_ui_url: String,
    mobile_ui_url: String,
    auth: Arc<AuthUpstream>,
}

impl GatewayRoutes {
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServiceError> {
        // Upstreams are internal services; never route them through a proxy
        let client = Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .no_proxy()
            .build()
            .map_err(|e| {
                ServiceError::configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            web_ui_url: config.web_ui_url.clone(),
            mobile_ui_url: config.mobile_ui_url.clone(),
            auth: Arc::new(AuthUpstream {
                client,
                base_url: config.auth_url.trim_end_matches('/').to_string(),
                callback_url: config.auth_callback_url.clone(),
            }),
        })
    }

    /// Pick the UI a client should land on
    fn ui_target(&self, request: &ServiceRequest) -> &str {
        match request.query_param("target") {
            Some("mobile") => return &self.mobile_ui_url,
            Some("web") => return &self.web_ui_url,
            _ => {}
        }

        let agent = request
            .header(header::USER_AGENT.as_str())
            .unwrap_or_default()
            .to_lowercase();
        if MOBILE_AGENT_HINTS.iter().any(|hint| agent.contains(hint)) {
            &self.mobile_ui_url
        } else {
            &self.web_ui_url
        }
    }
}

impl RouteSetup for GatewayRoutes {
    fn setup_routes(&self, routes: &mut RouteRegistry) -> Result<(), ServiceError> {
        let started_at = Instant::now();
        routes.insert("/health", Method::Get, move |_| {
            let status = HealthStatus {
                status: "ok".to_string(),
                uptime_seconds: started_at.elapsed().as_secs(),
            };
            ServiceResponse::json(StatusCode::OK, &status)
        })?;

        let gateway = self.clone();
        routes.insert("/", Method::Get, move |request| {
            ServiceResponse::redirect(gateway.ui_target(request))
        })?;

        let auth = Arc::clone(&self.auth);
        routes.insert_async("/auth/login", Method::Get, move |request| {
            Arc::clone(&auth).login(request)
        })?;

        let auth = Arc::clone(&self.auth);
        routes.insert_async("/auth/callback", Method::Get, move |request| {
            Arc::clone(&auth).callback(request)
        })?;

        let auth = Arc::clone(&self.auth);
        routes.insert_async("/me", Method::Get, move |request| {
            Arc::clone(&auth).user_info(request)
        })?;

        Ok(())
    }
}

/// Client side of the auth service
#[derive(Debug)]
struct AuthUpstream {
    client: Client,
    base_url: String,
    callback_url: String,
}

/// Body of POST /authenticate
#[derive(Debug, Serialize)]
struct AuthenticateRequest<'a> {
    code: &'a str,
    redirect_uri: &'a str,
    state: Option<&'a str>,
    nonce: Option<&'a str>,
}

impl AuthUpstream {
    /// Ask the auth service for an authorization URL
    async fn login(self: Arc<Self>, request: ServiceRequest) -> ServiceResponse {
        let redirect_uri = request
            .query_param("redirect_uri")
            .unwrap_or(&self.callback_url);
        let result = self
            .client
            .get(format!("{}/auth/authorize", self.base_url))
            .query(&[("redirect_uri", redirect_uri)])
            .send()
            .await;
        relay(result).await
    }

    /// Exchange the authorization code for tokens
    async fn callback(self: Arc<Self>, request: ServiceRequest) -> ServiceResponse {
        let Some(code) = request.query_param("code") else {
            return detail(
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing query parameter: code",
            );
        };
        let body = AuthenticateRequest {
            code,
            redirect_uri: &self.callback_url,
            state: request.query_param("state"),
            nonce: request.query_param("nonce"),
        };
        let result = self
            .client
            .post(format!("{}/authenticate", self.base_url))
            .json(&body)
            .send()
            .await;
        relay(result).await
    }

    /// Resolve the caller's bearer token to user info
    async fn user_info(self: Arc<Self>, request: ServiceRequest) -> ServiceResponse {
        let Some(token) = bearer_token(&request) else {
            return detail(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid Authorization header",
            );
        };
        let result = self
            .client
            .get(format!("{}/userinfo", self.base_url))
            .bearer_auth(token)
            .send()
            .await;
        relay(result).await
    }
}

fn bearer_token(request: &ServiceRequest) -> Option<&str> {
    let (scheme, token) = request
        .header(header::AUTHORIZATION.as_str())?
        .split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Error body in the `{"detail": ...}` shape
fn detail(status: StatusCode, message: impl Into<Value>) -> ServiceResponse {
    ServiceResponse::json(status, &json!({ "detail": message.into() }))
}

/// Pass a JSON 200 through; wrap anything else as an error detail
async fn relay(result: reqwest::Result<reqwest::Response>) -> ServiceResponse {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Auth service request failed");
            return detail(
                StatusCode::BAD_GATEWAY,
                format!("auth service unavailable: {}", e),
            );
        }
    };

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body: Bytes = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Auth service response could not be read");
            return detail(StatusCode::BAD_GATEWAY, format!("auth service response: {}", e));
        }
    };
    let parsed = serde_json::from_slice::<Value>(&body);

    if status != StatusCode::OK {
        let upstream = parsed
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        return detail(status, upstream);
    }
    if parsed.is_err() {
        return detail(StatusCode::BAD_GATEWAY, "auth service returned invalid JSON");
    }

    let mut relayed = ServiceResponse::new(StatusCode::OK);
    relayed.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    relayed.body = body;
    relayed
}

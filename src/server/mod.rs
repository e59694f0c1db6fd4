// Chinta - Routable HTTP service
// A long-running service that owns a listening endpoint and a route registry

mod gateway;
mod listener;
mod routes;

pub use gateway::GatewayRoutes;
pub use listener::{AxumListener, Listener, ListenerHandle};
pub use routes::{
    Dispatcher, Handler, Method, RouteKey, RouteRegistry, ServiceRequest, ServiceResponse,
};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::ServiceError;

/// Populates a service's routes before its endpoint opens
///
/// Implemented by concrete services; plain closures over `&mut RouteRegistry`
/// work too.
pub trait RouteSetup: Send + Sync {
    fn setup_routes(&self, routes: &mut RouteRegistry) -> Result<(), ServiceError>;
}

impl<F> RouteSetup for F
where
    F: Fn(&mut RouteRegistry) -> Result<(), ServiceError> + Send + Sync,
{
    fn setup_routes(&self, routes: &mut RouteRegistry) -> Result<(), ServiceError> {
        self(routes)
    }
}

/// Where a service is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Accepting route registrations
    Configured,
    /// Routes frozen, endpoint being opened
    Starting,
    /// Endpoint open
    Serving { local_addr: Option<SocketAddr> },
    /// Endpoint closed
    Stopped,
}

/// Service that dispatches requests from a listener to registered routes
///
/// Routes can be registered until `start()` begins; after that the registry
/// is frozen and shared read-only with the listener.
pub struct RoutableService {
    address: String,
    port: u16,
    setup: Box<dyn RouteSetup>,
    listener: Arc<dyn Listener>,
    /// Pending routes; `None` once frozen
    pending: Mutex<Option<RouteRegistry>>,
    state: watch::Sender<ServiceState>,
    shutdown: CancellationToken,
}

impl RoutableService {
    /// Create a service bound (later) to `address:port`
    ///
    /// Validates the endpoint but does not open it.
    pub fn new(
        address: impl Into<String>,
        port: u16,
        setup: impl RouteSetup + 'static,
        listener: Arc<dyn Listener>,
    ) -> Result<Self, ServiceError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(ServiceError::configuration("bind address must not be empty"));
        }
        if port == 0 {
            return Err(ServiceError::configuration(
                "bind port must be in the range 1-65535",
            ));
        }

        let (state, _) = watch::channel(ServiceState::Configured);

        Ok(Self {
            address,
            port,
            setup: Box::new(setup),
            listener,
            pending: Mutex::new(Some(RouteRegistry::new())),
            state,
            shutdown: CancellationToken::new(),
        })
    }

    /// Create a service served by [`AxumListener`]
    pub fn with_axum(
        address: impl Into<String>,
        port: u16,
        setup: impl RouteSetup + 'static,
    ) -> Result<Self, ServiceError> {
        Self::new(address, port, setup, Arc::new(AxumListener::new()))
    }

    /// Register a route; only allowed before `start()`
    pub fn register_route<F>(&self, path: &str, method: Method, handler: F) -> Result<(), ServiceError>
    where
        F: Fn(&ServiceRequest) -> ServiceResponse + Send + Sync + 'static,
    {
        let mut pending = self.pending();
        match pending.as_mut() {
            Some(routes) => routes.insert(path, method, handler),
            None => {
                warn!(path = path, method = %method, "Route registration rejected, service already started");
                Err(ServiceError::lifecycle(format!(
                    "cannot register {} {} after start()",
                    method, path
                )))
            }
        }
    }

    /// Run the setup hook, open the endpoint, and serve until stopped
    ///
    /// Blocks until `stop()` is called or the listener fails. A bind failure
    /// is returned to the caller without retrying; the service returns to
    /// `Configured` so the caller may try again.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut routes = self
            .pending()
            .take()
            .ok_or_else(|| ServiceError::lifecycle("service already started"))?;
        self.state.send_replace(ServiceState::Starting);

        if let Err(e) = self.setup.setup_routes(&mut routes) {
            self.restore(routes);
            return Err(e);
        }

        let handle = match self.listener.open(&self.address, self.port).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(address = %self.address, port = self.port, error = %e, "Failed to open endpoint");
                self.restore(routes);
                return Err(e);
            }
        };

        let local_addr = handle.local_addr();
        info!(
            address = %self.address,
            port = self.port,
            local_addr = ?local_addr,
            routes = routes.len(),
            "Service listening"
        );
        self.state.send_replace(ServiceState::Serving { local_addr });

        let result = handle
            .serve(Dispatcher::new(routes), self.shutdown.clone())
            .await;

        self.state.send_replace(ServiceState::Stopped);
        match &result {
            Ok(()) => info!("Service stopped"),
            Err(e) => warn!(error = %e, "Service stopped with error"),
        }
        result
    }

    /// Ask a running service to close its endpoint
    ///
    /// Idempotent. Before `start()` it has no effect.
    pub fn stop(&self) {
        if self.state() == ServiceState::Configured {
            return;
        }
        if !self.shutdown.is_cancelled() {
            info!("Service stop requested");
            self.shutdown.cancel();
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Wait until the endpoint is open, returning its local address
    ///
    /// Returns `None` if the service stops first. Keeps waiting while the
    /// service is still `Configured`.
    pub async fn serving(&self) -> Option<SocketAddr> {
        let mut receiver = self.state.subscribe();
        let state = receiver
            .wait_for(|state| {
                matches!(state, ServiceState::Serving { .. } | ServiceState::Stopped)
            })
            .await
            .ok()?;
        match *state {
            ServiceState::Serving { local_addr } => local_addr,
            _ => None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn pending(&self) -> MutexGuard<'_, Option<RouteRegistry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restore(&self, routes: RouteRegistry) {
        *self.pending() = Some(routes);
        self.state.send_replace(ServiceState::Configured);
    }
}

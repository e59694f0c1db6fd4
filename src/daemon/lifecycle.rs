// Daemon lifecycle management
//
// `DaemonContext` owns everything the detached process shares between the
// service loop and the shutdown path: configuration, the log sink, the
// shutdown marker, the process state and the PID file.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::log_sink::LogSink;
use super::pid_file::PidFile;
use super::signals::{ShutdownCause, ShutdownFlag};
use crate::config::DaemonConfig;
use crate::server::RoutableService;

/// How often a hosted service is asked to stop until its task ends
const STOP_RETRY: Duration = Duration::from_millis(50);

/// Process-wide daemon state; transitions are one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessState {
    Foreground,
    Detached,
    Terminating,
}

/// Explicit context for a detached daemon
pub struct DaemonContext {
    heartbeat_interval: Duration,
    sink: LogSink,
    shutdown: ShutdownFlag,
    state: ProcessState,
    pid_file: Option<PidFile>,
}

impl DaemonContext {
    /// Enter the Detached state
    ///
    /// Expects `sink` to already receive tracing records. Logs the start
    /// record and writes the PID file if one is configured.
    pub fn start(config: &DaemonConfig, sink: LogSink, shutdown: ShutdownFlag) -> Result<Self> {
        info!(
            pid = std::process::id(),
            heartbeat_ms = config.heartbeat_interval_ms,
            log = %sink.path().display(),
            "Daemon started"
        );

        let pid_file = config.pid_file.as_ref().map(PidFile::new);
        if let Some(pid_file) = &pid_file {
            pid_file.write()?;
        }

        Ok(Self {
            heartbeat_interval: config.heartbeat_interval(),
            sink,
            shutdown,
            state: ProcessState::Detached,
            pid_file,
        })
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// Heartbeat until shutdown is requested
    ///
    /// Each cycle logs one record and then waits one interval. On exit the
    /// shutdown cause is logged. Returns the number of heartbeats emitted.
    pub async fn run_service_loop(&self) -> u64 {
        let mut beats = 0u64;
        while !self.shutdown.is_requested() {
            beats += 1;
            info!(beat = beats, "Daemon is running");
            if self.shutdown.wait(self.heartbeat_interval).await {
                break;
            }
        }

        match self.shutdown.cause() {
            Some(ShutdownCause::Signal(signal)) => {
                info!(signal = signal.as_str(), "Daemon received signal, exiting");
            }
            Some(ShutdownCause::Requested) | None => {
                info!("Daemon shutdown requested, exiting");
            }
        }
        beats
    }

    /// Heartbeat while hosting `service`, stopping it once shutdown is requested
    ///
    /// Service failures are logged and never end the loop. The service is
    /// closed before this returns. Returns the number of heartbeats emitted.
    pub async fn run_hosting(&self, service: Arc<RoutableService>) -> u64 {
        let mut task = tokio::spawn({
            let service = Arc::clone(&service);
            let shutdown = self.shutdown.clone();
            async move {
                if shutdown.is_requested() {
                    debug!("Shutdown requested before the hosted service started");
                    return;
                }
                if let Err(e) = service.start().await {
                    error!(error = %e, "Hosted service failed");
                }
            }
        });

        let beats = self.run_service_loop().await;

        info!("Stopping hosted service");
        loop {
            // stop() has no effect until start() has frozen the routes
            service.stop();
            tokio::select! {
                joined = &mut task => {
                    if let Err(e) = joined {
                        error!(error = %e, "Hosted service task failed");
                    }
                    break;
                }
                _ = tokio::time::sleep(STOP_RETRY) => {}
            }
        }
        beats
    }

    /// Enter the Terminating state and release process-wide resources
    ///
    /// Runs in normal execution context, never inside a signal handler.
    pub fn terminate(mut self) -> Result<()> {
        self.state = ProcessState::Terminating;

        if let Some(pid_file) = &self.pid_file {
            if let Err(e) = pid_file.cleanup() {
                warn!(error = %e, "Failed to remove PID file");
            }
        }

        info!(state = ?self.state, "Daemon stopped");
        self.sink.close().context("Failed to close daemon log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServiceError;
    use crate::server::{Method, RouteRegistry, ServiceResponse, ServiceState};
    use axum::http::StatusCode;
    use nix::sys::signal::Signal;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(dir: &Path, heartbeat_ms: u64) -> DaemonConfig {
        DaemonConfig {
            heartbeat_interval_ms: heartbeat_ms,
            log_file: dir.join("daemon.log"),
            pid_file: Some(dir.join("daemon.pid")),
            ..Default::default()
        }
    }

    fn subscriber_for(sink: &LogSink) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .finish()
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(ProcessState::Foreground < ProcessState::Detached);
        assert!(ProcessState::Detached < ProcessState::Terminating);
    }

    #[tokio::test]
    async fn test_lifecycle_records_in_order() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 20);
        let sink = LogSink::open(&config.log_file).unwrap();
        let _guard = tracing::subscriber::set_default(subscriber_for(&sink));

        let shutdown = ShutdownFlag::new();
        let context = DaemonContext::start(&config, sink.clone(), shutdown.clone()).unwrap();
        assert_eq!(context.state(), ProcessState::Detached);
        assert!(dir.path().join("daemon.pid").exists());

        let requester = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(90)).await;
            requester.request();
        });

        let beats = context.run_service_loop().await;
        assert!(beats >= 2, "expected several heartbeats, got {}", beats);

        context.terminate().unwrap();
        assert!(!sink.is_open());
        assert!(!dir.path().join("daemon.pid").exists());

        let log = std::fs::read_to_string(&config.log_file).unwrap();
        let started = log.find("Daemon started").unwrap();
        let running = log.find("Daemon is running").unwrap();
        let requested = log.find("Daemon shutdown requested").unwrap();
        let stopped = log.find("Daemon stopped").unwrap();
        assert!(started < running && running < requested && requested < stopped);
    }

    #[tokio::test]
    async fn test_loop_exits_within_one_interval() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 2000);
        let sink = LogSink::open(&config.log_file).unwrap();
        let _guard = tracing::subscriber::set_default(subscriber_for(&sink));

        let shutdown = ShutdownFlag::new();
        let context = DaemonContext::start(&config, sink, shutdown.clone()).unwrap();

        let requester = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            requester.request();
        });

        let started = std::time::Instant::now();
        let beats = context.run_service_loop().await;
        assert_eq!(beats, 1);
        assert!(started.elapsed() < Duration::from_millis(2000));
        context.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_loop_does_not_start_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 20);
        let sink = LogSink::open(&config.log_file).unwrap();

        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let context = DaemonContext::start(&config, sink, shutdown).unwrap();

        assert_eq!(context.run_service_loop().await, 0);
        context.terminate().unwrap();
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn hosted_service(port: u16) -> Arc<RoutableService> {
        let setup = |routes: &mut RouteRegistry| -> Result<(), ServiceError> {
            routes.insert("/health", Method::Get, |_| {
                ServiceResponse::text(StatusCode::OK, "ok")
            })
        };
        Arc::new(RoutableService::with_axum("127.0.0.1", port, setup).unwrap())
    }

    #[tokio::test]
    async fn test_hosting_returns_when_shutdown_precedes_start() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 20);
        let sink = LogSink::open(&config.log_file).unwrap();

        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let context = DaemonContext::start(&config, sink, shutdown).unwrap();
        let service = hosted_service(free_port());

        let beats = tokio::time::timeout(
            Duration::from_secs(3),
            context.run_hosting(Arc::clone(&service)),
        )
        .await
        .expect("hosting must end once shutdown is requested");
        assert_eq!(beats, 0);
        assert_eq!(service.state(), ServiceState::Configured);
        context.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_hosting_stops_serving_service() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 20);
        let sink = LogSink::open(&config.log_file).unwrap();

        let shutdown = ShutdownFlag::new();
        let context = DaemonContext::start(&config, sink, shutdown.clone()).unwrap();
        let service = hosted_service(free_port());

        let observed = Arc::clone(&service);
        tokio::spawn(async move {
            assert!(observed.serving().await.is_some());
            shutdown.request();
        });

        let beats = tokio::time::timeout(
            Duration::from_secs(3),
            context.run_hosting(Arc::clone(&service)),
        )
        .await
        .expect("hosting must end once shutdown is requested");
        assert!(beats >= 1);
        assert_eq!(service.state(), ServiceState::Stopped);
        context.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_hosting_survives_bind_failure() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 20);
        let sink = LogSink::open(&config.log_file).unwrap();

        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let service = hosted_service(taken.local_addr().unwrap().port());

        let shutdown = ShutdownFlag::new();
        let context = DaemonContext::start(&config, sink, shutdown.clone()).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            shutdown.request();
        });

        let beats = context.run_hosting(Arc::clone(&service)).await;
        assert!(beats >= 2, "heartbeat must continue, got {}", beats);
        assert_eq!(service.state(), ServiceState::Configured);
        context.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_loop_logs_signal_name() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 20);
        let sink = LogSink::open(&config.log_file).unwrap();
        let _guard = tracing::subscriber::set_default(subscriber_for(&sink));

        let shutdown = ShutdownFlag::new();
        let context = DaemonContext::start(&config, sink, shutdown).unwrap();
        context.shutdown_flag().simulate_signal(Signal::SIGINT);
        context.run_service_loop().await;
        context.terminate().unwrap();

        let log = std::fs::read_to_string(&config.log_file).unwrap();
        assert!(log.contains("Daemon received signal"));
        assert!(log.contains("SIGINT"));
    }
}

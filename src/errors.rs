// Error taxonomy for the daemon and the routing shell
//
// Daemonization failures are fatal and carry a distinct process exit code.
// Service errors are local to the caller and never terminate the host process.

use nix::errno::Errno;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A step of the foreground -> detached transition failed.
///
/// The process identity may already be partially changed when one of these
/// is returned, so the only valid reaction is to exit with [`exit_code`].
///
/// [`exit_code`]: ProcessTransitionError::exit_code
#[derive(Debug, Error)]
pub enum ProcessTransitionError {
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),

    #[error("failed to create a new session: {0}")]
    Session(#[source] Errno),

    #[error("failed to change working directory to {}: {source}", path.display())]
    ChangeDirectory {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    #[error("failed to detach standard streams: {0}")]
    StdStreams(#[source] Errno),
}

impl ProcessTransitionError {
    /// Process exit status for this failure (distinct per step)
    pub fn exit_code(&self) -> u8 {
        match self {
            ProcessTransitionError::Fork(_) => 10,
            ProcessTransitionError::Session(_) => 11,
            ProcessTransitionError::ChangeDirectory { .. } => 12,
            ProcessTransitionError::StdStreams(_) => 13,
        }
    }

    /// Name of the failed step, used as a structured log field
    pub fn step(&self) -> &'static str {
        match self {
            ProcessTransitionError::Fork(_) => "fork",
            ProcessTransitionError::Session(_) => "setsid",
            ProcessTransitionError::ChangeDirectory { .. } => "chdir",
            ProcessTransitionError::StdStreams(_) => "std_streams",
        }
    }
}

/// Errors surfaced by a [`RoutableService`](crate::server::RoutableService)
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad bind address/port or malformed route key
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation not allowed in the service's current lifecycle state
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// The listening endpoint could not be opened
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The listener failed fatally while serving
    #[error("listener failed: {0}")]
    Listener(#[source] io::Error),
}

impl ServiceError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ServiceError::Configuration(message.into())
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        ServiceError::Lifecycle(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ServiceError::Configuration(_))
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, ServiceError::Lifecycle(_))
    }

    pub fn is_bind(&self) -> bool {
        matches!(self, ServiceError::Bind { .. })
    }
}

/// Format a daemon already running error
pub fn daemon_already_running_error(pid: u32, pid_file: &str) -> String {
    wrap_error_with_suggestion(
        format!("Daemon is already running (PID: {})", pid),
        &format!(
            "Stop the existing daemon first:\n  kill -TERM {}\n\n\
             If no such process exists, remove the stale PID file:\n  rm {}",
            pid, pid_file
        ),
    )
}

/// Wrap a generic error with suggestions
pub fn wrap_error_with_suggestion(error: impl fmt::Display, suggestion: &str) -> String {
    format!("{}\n\nSuggestion: {}", error, suggestion)
}

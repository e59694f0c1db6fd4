// Daemon module for background service mode
//
// Detaches the process from its terminal, routes termination signals into a
// shutdown marker, and runs the heartbeat loop against an explicit context.

pub mod detach;
pub mod lifecycle;
pub mod log_sink;
pub mod pid_file;
pub mod signals;

pub use detach::{daemonize, Detached, Fork, NixProcess, ProcessOps};
pub use lifecycle::{DaemonContext, ProcessState};
pub use log_sink::LogSink;
pub use pid_file::PidFile;
pub use signals::{install_signal_handlers, ShutdownCause, ShutdownFlag};

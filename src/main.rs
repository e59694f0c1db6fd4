// Chinta - Background service daemon
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

use chinta::config::{load_config, DaemonConfig};
use chinta::daemon::{
    daemonize, install_signal_handlers, DaemonContext, Detached, LogSink, NixProcess, PidFile,
};
use chinta::errors::daemon_already_running_error;
use chinta::server::{GatewayRoutes, RoutableService};

#[derive(Parser, Debug)]
#[command(name = "chinta")]
#[command(about = "Background service daemon", version)]
struct Args {
    /// Config file (default: ~/.chinta/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stay attached to the terminal instead of detaching
    #[arg(long)]
    foreground: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Config and paths are resolved while the launch directory is still current
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = &config.pid_file {
        let pid_file = PidFile::new(path);
        if pid_file.is_running() {
            let pid = pid_file.read().unwrap_or_default();
            eprintln!(
                "{}",
                daemon_already_running_error(pid, &path.display().to_string())
            );
            return ExitCode::FAILURE;
        }
    }

    // Must happen before any thread or the async runtime exists
    if !args.foreground {
        match daemonize(&mut NixProcess, &config.working_directory) {
            Ok(Detached::Parent { .. }) => return ExitCode::SUCCESS,
            Ok(Detached::Daemon) => {}
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(e.exit_code());
            }
        }
    }

    match run(config, args.foreground) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Daemon failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Open the sink, install signal handling and run until terminated
fn run(config: DaemonConfig, foreground: bool) -> Result<()> {
    let sink = LogSink::open(&config.log_file)?;
    sink.install_global(&config.log_level, foreground)?;

    let shutdown = install_signal_handlers().context("Failed to install signal handlers")?;
    let context = DaemonContext::start(&config, sink, shutdown)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    runtime.block_on(serve(&config, &context));
    drop(runtime);

    context.terminate()
}

/// Heartbeat loop plus the optional hosted gateway
async fn serve(config: &DaemonConfig, context: &DaemonContext) {
    if !config.server.enabled {
        context.run_service_loop().await;
        return;
    }

    let service = GatewayRoutes::from_config(&config.server).and_then(|routes| {
        RoutableService::with_axum(
            config.server.bind_address.clone(),
            config.server.port,
            routes,
        )
    });
    match service {
        Ok(service) => {
            context.run_hosting(Arc::new(service)).await;
        }
        Err(e) => {
            // Service errors never take the daemon down
            error!(error = %e, "Gateway service not started");
            context.run_service_loop().await;
        }
    }
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use lifo_server::config::resolve_environment;
use lifo_server::shutdown::{install_panic_hook, wait_for_signal};
use lifo_server::{telemetry, Config, ServerBuilder};

/// Bounded LIFO stack server.
#[derive(Debug, Parser)]
#[command(name = "lifo-server", version, about)]
struct Args {
    /// Configuration file (.toml or .json).
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Environment whose logging section applies. Falls back to LIFO_ENV, then NODE_ENV.
    #[arg(short, long)]
    env: Option<String>,

    /// Override serverPort.
    #[arg(long)]
    port: Option<u16>,

    /// Override diagnosticPort.
    #[arg(long)]
    diagnostic_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(port) = args.diagnostic_port {
        config.diagnostic_port = port;
    }
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let env = resolve_environment(args.env.as_deref());
    let log_guard = match telemetry::init(&config.logging_for(&env), &config.log_directory) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Config: {:?}", config);
    info!("Environment: {}", env);
    info!("Logging to {}", log_guard.log_file().display());

    let server = match ServerBuilder::from_config(&config).bind().await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = server.shutdown_handle();
    install_panic_hook(shutdown.clone());

    let signals = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                signals.shutdown(&signal.to_string());
            }
            Err(e) => {
                error!("Signal handler failed: {}", e);
                signals.shutdown("signal handler failure");
            }
        }
    });

    server.run().await;
    ExitCode::SUCCESS
}

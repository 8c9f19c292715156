use clap::Parser;
use portcullis_gateway::config::GatewayConfig;
use portcullis_gateway::server;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// The platform's request-admission gateway.
#[derive(Parser)]
#[command(name = "portcullis-gateway", version, about)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when
    /// omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match &cli.config {
        Some(path) => match GatewayConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "Fatal configuration error");
                return ExitCode::from(2);
            }
        },
        None => GatewayConfig::default(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(server::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Gateway terminated");
            ExitCode::FAILURE
        }
    }
}

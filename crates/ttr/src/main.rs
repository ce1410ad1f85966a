//! ttr CLI: long-running thermostat telemetry reader.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ttr::app::App;
use ttr_core::{init_tracing, Config};

/// Polls thermostat vendor clouds and writes canonical telemetry documents
/// to configured sinks.
#[derive(Parser, Debug)]
#[command(name = "ttr", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.ttr.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = %args.config,
        "starting thermostat telemetry reader"
    );
    config.log_effective();

    let shutdown = CancellationToken::new();
    let app = match App::build(&config, shutdown) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("Failed to initialize application: {err}");
            return ExitCode::FAILURE;
        }
    };

    app.run().await;

    info!("application stopped");
    ExitCode::SUCCESS
}

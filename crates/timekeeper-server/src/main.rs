//! Main entry point for the Timekeeper binary.
//!
//! `timekeeper -C` runs the controller; `timekeeper` runs a node.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use timekeeper_server::{
    config::{Cli, Configuration},
    startup,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let configuration = match Configuration::from_cli(&cli) {
        Ok(configuration) => configuration,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _logging_guard = match startup::init_logging(&configuration.logging_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    timekeeper_core::metrics::describe_metrics();

    let result = tokio::select! {
        result = timekeeper_server::run(&cli, &configuration) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, exiting");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use reactord::config::{Cli, Config};
use reactord::{logging, Server};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _logging = logging::init(&config);

    let mut server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to bind server");
            return ExitCode::FAILURE;
        }
    };

    let handle = server.handle();
    if let Err(e) = ctrlc::set_handler(move || {
        handle.stop();
    }) {
        error!(error = %e, "failed to install signal handler");
        return ExitCode::FAILURE;
    }

    match server.run() {
        Ok(()) => {
            info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "reactor loop exited with an error");
            ExitCode::FAILURE
        }
    }
}

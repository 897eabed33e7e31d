use std::env::consts::{ARCH, FAMILY, OS};
use std::process::ExitCode;

use anyhow::Error;
use clap::Parser;
use tracing::{error, trace};

use crate::harvest::cli::{Args, RunEnding};
use crate::harvest::config_loader::init_config;
use crate::harvest::logger::init_logger;
use crate::program::Program;

mod harvest;
mod program;

#[tokio::main]
async fn main() -> Result<ExitCode, Error> {
    let args = Args::parse();

    let config_manager = init_config(&args.config_dir)?;
    let config = config_manager.app_config().clone();

    // Held until exit so the file writer flushes.
    let _logger = init_logger(&config)?;
    log_system_information();

    match Program::new(args, config).run().await {
        Ok(RunEnding::Abandoned) => Ok(ExitCode::FAILURE),
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

/// Logs information about the system being used.
fn log_system_information() {
    trace!("ARCH:   \"{}\"", ARCH);
    trace!("FAMILY: \"{}\"", FAMILY);
    trace!("OS:     \"{}\"", OS);
}

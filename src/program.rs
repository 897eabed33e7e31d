use std::env::current_dir;

use anyhow::{Context, Error};
use console::{style, Term};
use tracing::{error, info, trace, warn};

use crate::harvest::cli::{Args, ProgressSink, Prompter, RunEnding};
use crate::harvest::{AppConfig, Credentials, RunCoordinator};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Exit status used when the user interrupts twice.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// What a Ctrl-C does during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Ask the run to stop at the next candidate boundary.
    Cancel,
    /// Leave now; an in-flight fetch may be waiting out its timeout.
    Quit,
}

impl Interrupt {
    fn after_presses(presses: usize) -> Self {
        if presses <= 1 {
            Interrupt::Cancel
        } else {
            Interrupt::Quit
        }
    }
}

/// Handles the flow of one harvesting session: resolve the request, check
/// the destination, start the run and render it until it ends.
pub(crate) struct Program {
    args: Args,
    config: AppConfig,
}

impl Program {
    pub(crate) fn new(args: Args, config: AppConfig) -> Self {
        Self { args, config }
    }

    pub(crate) async fn run(self) -> Result<RunEnding, Error> {
        Term::stdout().set_title("Image Harvester");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        if let Ok(dir) = current_dir() {
            trace!("Program Working Directory: {}", dir.display());
        }

        let request = Prompter::new(self.args.no_prompt).resolve(&self.args, &self.config)?;
        let params = &request.params;

        let credentials = Credentials::from_env();
        for name in credentials.missing_for(params.source) {
            warn!("{} is not set; {} requests will likely be refused", name, params.source.display_name());
        }

        // Pre-flight: the run never creates its destination.
        if !params.destination.as_os_str().is_empty() {
            tokio::fs::create_dir_all(&params.destination)
                .await
                .with_context(|| format!("Failed to create folder {}", params.destination.display()))?;
        }

        let coordinator = RunCoordinator::from_config(&self.config, &credentials)
            .context("Failed to build HTTP client")?;
        let sink = ProgressSink::new(params.target_count.max(1))?;

        let handle = coordinator.start(&request.query, params.clone()).map_err(|e| {
            error!("Start rejected: {}", e);
            e
        })?;
        info!(
            run_id = %handle.run_id(),
            "Harvesting {} '{}' images from {} into {}",
            params.target_count,
            request.query,
            params.source.display_name(),
            params.destination.display()
        );

        let ctrl_c = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let mut presses = 0;
                while tokio::signal::ctrl_c().await.is_ok() {
                    presses += 1;
                    match Interrupt::after_presses(presses) {
                        Interrupt::Cancel => {
                            println!("{}", style("Cancelling... press Ctrl-C again to quit").yellow());
                            coordinator.cancel();
                        }
                        Interrupt::Quit => {
                            warn!("Second interrupt, exiting without waiting for the run");
                            std::process::exit(INTERRUPTED_EXIT_CODE);
                        }
                    }
                }
            })
        };

        let ending = sink.drive(handle, || coordinator.is_cancelled()).await;
        ctrl_c.abort();

        Ok(ending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_cancels_second_quits() {
        assert_eq!(Interrupt::after_presses(1), Interrupt::Cancel);
        assert_eq!(Interrupt::after_presses(2), Interrupt::Quit);
        assert_eq!(Interrupt::after_presses(5), Interrupt::Quit);
    }
}

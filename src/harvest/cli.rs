//! Command line front end
//!
//! Arguments come from `clap`; anything missing is asked for with
//! `dialoguer` when stdout is a terminal. Run events are rendered by
//! [`ProgressSink`] on an `indicatif` bar.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use console::style;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, warn};

use crate::harvest::config_loader::AppConfig;
use crate::harvest::coordinator::RunHandle;
use crate::harvest::events::RunEvent;
use crate::harvest::normalizer;
use crate::harvest::{FileTypeFilter, RunParameters, SourceKind};

const CUSTOM_CATEGORY: &str = "Custom query...";
const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Error types for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UI interaction error: {0}")]
    Dialoguer(#[from] dialoguer::Error),

    #[error("Progress template error: {0}")]
    Template(#[from] indicatif::style::TemplateError),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Download images for a search query from Google or Unsplash.
#[derive(Parser, Debug, Clone)]
#[command(name = "image_harvester", version, about)]
pub struct Args {
    /// Search query, e.g. a dish name
    #[arg(short, long, env = "HARVEST_QUERY")]
    pub query: Option<String>,

    /// google-api, unsplash or google-scrape
    #[arg(short, long)]
    pub source: Option<SourceKind>,

    /// Number of images to keep
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// any, jpg or png (Google scrape only)
    #[arg(short = 't', long)]
    pub file_type: Option<FileTypeFilter>,

    /// Destination folder
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Folder holding config.toml
    #[arg(long, default_value = ".", env = "HARVEST_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Never prompt; use config defaults for anything not given
    #[arg(long)]
    pub no_prompt: bool,
}

/// What the user asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub query: String,
    pub params: RunParameters,
}

/// Parses a typed count; anything that is not a number means 1.
pub fn parse_count(input: &str) -> usize {
    input.trim().parse().unwrap_or(1)
}

/// Fills in a [`RunRequest`] from arguments, prompts and config defaults.
pub struct Prompter {
    theme: ColorfulTheme,
    interactive: bool,
}

impl Prompter {
    pub fn new(no_prompt: bool) -> Self {
        Self {
            theme: ColorfulTheme::default(),
            interactive: !no_prompt && std::io::stdout().is_terminal(),
        }
    }

    pub fn resolve(&self, args: &Args, config: &AppConfig) -> CliResult<RunRequest> {
        if args.query.is_none() && self.interactive {
            return self.prompt_all(args, config);
        }

        // Without a query the coordinator rejects the start.
        Ok(Self::from_args(args, config))
    }

    /// Builds the request without any prompting.
    pub fn from_args(args: &Args, config: &AppConfig) -> RunRequest {
        RunRequest {
            query: args.query.clone().unwrap_or_default(),
            params: RunParameters {
                source: args.source.unwrap_or(config.run.default_source),
                target_count: args.count.unwrap_or(config.run.default_count),
                file_type: args.file_type.unwrap_or(config.run.default_file_type),
                destination: args
                    .dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(&config.paths.download_directory)),
            },
        }
    }

    fn prompt_all(&self, args: &Args, config: &AppConfig) -> CliResult<RunRequest> {
        let query = self.prompt_query(&config.run.categories)?;

        let source = match args.source {
            Some(source) => source,
            None => self.prompt_source(config.run.default_source)?,
        };

        let target_count = match args.count {
            Some(count) => count,
            None => {
                let typed: String = Input::with_theme(&self.theme)
                    .with_prompt("How many images?")
                    .default(config.run.default_count.to_string())
                    .interact_text()?;
                parse_count(&typed)
            }
        };

        let file_type = match args.file_type {
            Some(file_type) => file_type,
            None if source == SourceKind::GoogleScrape => self.prompt_file_type(config.run.default_file_type)?,
            None => config.run.default_file_type,
        };

        let destination = match &args.dir {
            Some(dir) => dir.clone(),
            None => {
                let typed: String = Input::with_theme(&self.theme)
                    .with_prompt("Save to folder")
                    .default(config.paths.download_directory.clone())
                    .interact_text()?;
                PathBuf::from(typed.trim())
            }
        };

        Ok(RunRequest {
            query,
            params: RunParameters {
                source,
                target_count,
                file_type,
                destination,
            },
        })
    }

    fn prompt_query(&self, categories: &[String]) -> CliResult<String> {
        let mut items: Vec<&str> = categories.iter().map(String::as_str).collect();
        items.push(CUSTOM_CATEGORY);

        let selection = Select::with_theme(&self.theme)
            .with_prompt("Choose a category")
            .items(&items)
            .default(0)
            .interact()?;

        if selection < categories.len() {
            return Ok(categories[selection].clone());
        }

        let typed: String = Input::with_theme(&self.theme)
            .with_prompt("Search query")
            .allow_empty(true)
            .interact_text()?;
        Ok(typed.trim().to_string())
    }

    fn prompt_source(&self, default: SourceKind) -> CliResult<SourceKind> {
        let variants = SourceKind::variants();
        let names: Vec<&str> = variants.iter().map(|s| s.display_name()).collect();
        let default_index = variants.iter().position(|s| *s == default).unwrap_or(0);

        let selection = Select::with_theme(&self.theme)
            .with_prompt("Image source")
            .items(&names)
            .default(default_index)
            .interact()?;
        Ok(variants[selection])
    }

    fn prompt_file_type(&self, default: FileTypeFilter) -> CliResult<FileTypeFilter> {
        let variants = FileTypeFilter::variants();
        let names: Vec<String> = variants.iter().map(|f| f.to_string()).collect();
        let default_index = variants.iter().position(|f| *f == default).unwrap_or(0);

        let selection = Select::with_theme(&self.theme)
            .with_prompt("File type")
            .items(&names)
            .default(default_index)
            .interact()?;
        Ok(variants[selection])
    }
}

/// How the event stream ended, as seen by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnding {
    Finished { downloaded: usize, errors: usize },
    Cancelled,
    /// The stream closed with no `Finished` and no cancellation.
    Abandoned,
}

impl RunEnding {
    pub fn new(finished: Option<(usize, usize)>, cancel_requested: bool) -> Self {
        match finished {
            Some((downloaded, errors)) => RunEnding::Finished { downloaded, errors },
            None if cancel_requested => RunEnding::Cancelled,
            None => RunEnding::Abandoned,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RunEnding::Finished { downloaded, errors } => {
                format!("Download finished. Downloaded: {}, Errors: {}", downloaded, errors)
            }
            RunEnding::Cancelled => "Download cancelled.".to_string(),
            RunEnding::Abandoned => "Worker exited without sending 'finished'".to_string(),
        }
    }
}

/// Text shown for a thumbnail event.
pub fn describe_thumbnail(bytes: &[u8]) -> String {
    match normalizer::decode(bytes) {
        Ok(preview) => format!(
            "preview {}x{}",
            preview.image.width(),
            preview.image.height()
        ),
        Err(e) => format!("Thumbnail error: {}", e),
    }
}

/// Renders run events on a progress bar.
pub struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    pub fn new(target_count: usize) -> CliResult<Self> {
        let bar = ProgressBar::new(target_count as u64);
        bar.set_style(ProgressStyle::with_template(BAR_TEMPLATE)?.progress_chars("=>-"));
        Ok(Self { bar })
    }

    /// Consumes events until the run is over. `cancel_requested` is asked
    /// once the stream closes.
    pub async fn drive(&self, mut handle: RunHandle, cancel_requested: impl Fn() -> bool) -> RunEnding {
        let mut finished = None;

        while let Some(event) = handle.next_event().await {
            match event {
                RunEvent::Log(line) => self.bar.println(line),
                RunEvent::Progress(n) => self.bar.set_position(n as u64),
                RunEvent::Thumbnail(bytes) => {
                    let text = describe_thumbnail(&bytes);
                    if text.starts_with("Thumbnail error") {
                        self.bar.println(style(&text).yellow().to_string());
                    } else {
                        self.bar.set_message(text);
                    }
                }
                RunEvent::Finished { downloaded, errors } => {
                    if let Some(len) = self.bar.length() {
                        self.bar.set_position(len);
                    }
                    finished = Some((downloaded, errors));
                }
            }
        }

        if let Err(e) = handle.join().await {
            warn!("Run task failed: {}", e);
        }

        let ending = RunEnding::new(finished, cancel_requested());
        debug!("Run ended: {:?}", ending);

        let message = match ending {
            RunEnding::Finished { .. } => style(ending.message()).green(),
            RunEnding::Cancelled => style(ending.message()).yellow(),
            RunEnding::Abandoned => style(ending.message()).red(),
        };
        self.bar.finish_and_clear();
        println!("{}", message);

        ending
    }
}

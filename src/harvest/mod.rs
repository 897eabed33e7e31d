//! Image harvesting pipeline
//!
//! This module provides:
//! 1. Source discovery against two search APIs and one results page scrape
//! 2. Streamed candidate fetching over HTTPS only
//! 3. Decode/validate and minimum-size upscaling of every candidate
//! 4. A run coordinator that writes accepted images and reports events to a sink

pub mod cli;
pub mod config_loader;
pub mod coordinator;
pub mod events;
pub mod fetcher;
pub mod io;
pub mod logger;
pub mod normalizer;
pub mod sources;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Re-export commonly used types for convenience
pub use config_loader::{AppConfig, ConfigError, ConfigManager, ConfigResult, Credentials};
pub use coordinator::{RunCoordinator, RunHandle, StartError, StartResult};
pub use events::{AcceptedImage, EventSink, RunEvent, RunState};
pub use fetcher::{CandidateFetcher, FetchError, FetchResult};
pub use normalizer::{NormalizeError, NormalizeResult};
pub use sources::{Candidate, Discovery, ImageSource, SourceSet, StopReason};

/// The remote source a run discovers its candidates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Google Custom Search JSON API.
    GoogleApi,
    /// Unsplash photo search API.
    Unsplash,
    /// Google image results page, scraped.
    GoogleScrape,
}

impl SourceKind {
    pub fn variants() -> &'static [SourceKind] {
        &[SourceKind::GoogleApi, SourceKind::Unsplash, SourceKind::GoogleScrape]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::GoogleApi => "Google API",
            SourceKind::Unsplash => "Unsplash",
            SourceKind::GoogleScrape => "Google",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::GoogleApi => write!(f, "google_api"),
            SourceKind::Unsplash => write!(f, "unsplash"),
            SourceKind::GoogleScrape => write!(f, "google_scrape"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "google_api" => Ok(SourceKind::GoogleApi),
            "unsplash" => Ok(SourceKind::Unsplash),
            "google_scrape" | "google" => Ok(SourceKind::GoogleScrape),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Output type requested by the caller. Only the scrape path honours it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTypeFilter {
    #[default]
    Any,
    Jpg,
    Png,
}

impl FileTypeFilter {
    pub fn variants() -> &'static [FileTypeFilter] {
        &[FileTypeFilter::Any, FileTypeFilter::Jpg, FileTypeFilter::Png]
    }

    /// The extension this filter forces, if any.
    pub fn forced_extension(&self) -> Option<&'static str> {
        match self {
            FileTypeFilter::Any => None,
            FileTypeFilter::Jpg => Some("jpg"),
            FileTypeFilter::Png => Some("png"),
        }
    }
}

impl fmt::Display for FileTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileTypeFilter::Any => write!(f, "any"),
            FileTypeFilter::Jpg => write!(f, "jpg"),
            FileTypeFilter::Png => write!(f, "png"),
        }
    }
}

impl FromStr for FileTypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(FileTypeFilter::Any),
            "jpg" | "jpeg" => Ok(FileTypeFilter::Jpg),
            "png" => Ok(FileTypeFilter::Png),
            other => Err(format!("unknown file type: {}", other)),
        }
    }
}

/// Everything a run needs besides the query. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParameters {
    pub source: SourceKind,
    pub target_count: usize,
    pub file_type: FileTypeFilter,
    pub destination: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parses_cli_spellings() {
        assert_eq!("google-api".parse::<SourceKind>(), Ok(SourceKind::GoogleApi));
        assert_eq!("Unsplash".parse::<SourceKind>(), Ok(SourceKind::Unsplash));
        assert_eq!("google".parse::<SourceKind>(), Ok(SourceKind::GoogleScrape));
        assert!("bing".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_file_type_filter_forced_extension() {
        assert_eq!(FileTypeFilter::Any.forced_extension(), None);
        assert_eq!("JPEG".parse::<FileTypeFilter>().unwrap().forced_extension(), Some("jpg"));
        assert_eq!(FileTypeFilter::Png.forced_extension(), Some("png"));
    }
}

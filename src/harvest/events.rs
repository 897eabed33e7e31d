//! Run events and run bookkeeping
//!
//! The worker owns a [`RunState`] for the life of one run and reports
//! through an [`EventSink`]. The sink side is a plain unbounded channel so
//! the worker never waits on the consumer.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Characters of a locator kept in log lines.
const LOG_URL_CHARS: usize = 70;

/// An event emitted by a run, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Log(String),
    Progress(usize),
    Thumbnail(Vec<u8>),
    Finished { downloaded: usize, errors: usize },
}

/// An image that passed validation and was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedImage {
    pub sequence_number: usize,
    pub file_path: PathBuf,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub source_locator: String,
}

/// Counters for a single run.
#[derive(Debug, Default, Clone)]
pub struct RunState {
    pub downloaded_count: usize,
    pub error_count: usize,
    pub cancelled: bool,
    pub accepted: Vec<AcceptedImage>,
}

impl RunState {
    /// Sequence number the next accepted image will carry.
    pub fn next_sequence(&self) -> usize {
        self.downloaded_count + 1
    }

    pub(crate) fn record_accepted(&mut self, image: AcceptedImage) {
        self.downloaded_count += 1;
        self.accepted.push(image);
    }

    pub(crate) fn record_error(&mut self) {
        self.error_count += 1;
    }
}

/// Producer half of the event channel, held by the worker.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Informational log line.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "harvest::run", "{}", message);
        self.send(RunEvent::Log(message));
    }

    /// Log line describing a skipped or failed candidate.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "harvest::run", "{}", message);
        self.send(RunEvent::Log(message));
    }

    pub fn progress(&self, downloaded: usize) {
        self.send(RunEvent::Progress(downloaded));
    }

    pub fn thumbnail(&self, preview: Vec<u8>) {
        self.send(RunEvent::Thumbnail(preview));
    }

    pub fn finished(&self, downloaded: usize, errors: usize) {
        info!(target: "harvest::run", downloaded, errors, "Run finished");
        self.send(RunEvent::Finished { downloaded, errors });
    }

    // A dropped receiver means nobody is listening anymore; the run carries on.
    fn send(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

/// Shortens a locator for log output.
pub fn short_url(url: &str) -> String {
    url.chars().take(LOG_URL_CHARS).collect()
}

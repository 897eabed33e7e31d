//! Run coordinator
//!
//! One run at a time per coordinator. A run goes `Idle -> Running ->
//! Completed | Cancelled`; it executes on its own tokio task and talks to the
//! caller only through the event channel in [`RunHandle`].
//!
//! Per candidate: stop if the target is met or cancellation was requested,
//! fetch, validate/normalize, write `<query>_<n>.<ext>`, then emit
//! `Progress(n)` followed by a `Thumbnail`. Failures are tallied and logged
//! and never end the run. `Finished` is emitted exactly once for a completed
//! run and never for a cancelled one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinHandle};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::harvest::config_loader::{AppConfig, Credentials};
use crate::harvest::events::{short_url, AcceptedImage, EventSink, RunEvent, RunState};
use crate::harvest::fetcher::{CandidateFetcher, FetchError};
use crate::harvest::io::{self, RAW_PREVIEW_BYTES};
use crate::harvest::logger::{log_run, log_run_summary, RunStatus};
use crate::harvest::normalizer::{self, NormalizeError, NormalizeResult, NormalizedImage};
use crate::harvest::sources::{ImageSource, SaveMode, SourceSet};
use crate::harvest::RunParameters;

/// Error types for start requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("Download is already running")]
    AlreadyRunning,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Target count must be at least 1")]
    InvalidTargetCount,
}

/// Result type for start requests
pub type StartResult<T> = Result<T, StartError>;

/// Caller side of a running job.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    events: mpsc::UnboundedReceiver<RunEvent>,
    worker: JoinHandle<RunState>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next event in emission order; `None` once the run is over.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Waits for the worker and returns its final counters.
    pub async fn join(self) -> Result<RunState, JoinError> {
        self.worker.await
    }

    /// Drains every remaining event, then joins the worker.
    pub async fn collect(mut self) -> Result<(Vec<RunEvent>, RunState), JoinError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let state = self.worker.await?;
        Ok((events, state))
    }
}

/// Clears the active flag when the run lets go of it.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Starts runs and owns the cancellation flag.
#[derive(Clone)]
pub struct RunCoordinator {
    sources: SourceSet,
    fetcher: CandidateFetcher,
    cancel: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl RunCoordinator {
    pub fn new(sources: SourceSet, fetcher: CandidateFetcher) -> Self {
        Self {
            sources,
            fetcher,
            cancel: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds a coordinator with production sources sharing one HTTP client.
    pub fn from_config(config: &AppConfig, credentials: &Credentials) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(&config.http.user_agent)
            .gzip(true)
            .build()?;

        let fetcher = CandidateFetcher::new(
            client.clone(),
            Duration::from_secs(config.http.fetch_timeout_secs),
            &config.http.user_agent,
        );
        let sources = SourceSet::from_config(client, config, credentials);

        Ok(Self::new(sources, fetcher))
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Requests cancellation of the active run. Safe to call at any time,
    /// any number of times.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Starts a run on a new task. Rejected synchronously, without touching
    /// any state, if a run is active or a required field is missing.
    pub fn start(&self, query: &str, params: RunParameters) -> StartResult<RunHandle> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }

        let query = query.trim();
        if query.is_empty() {
            return Err(StartError::MissingField("query"));
        }
        if params.destination.as_os_str().is_empty() {
            return Err(StartError::MissingField("destination_directory"));
        }
        if params.target_count == 0 {
            return Err(StartError::InvalidTargetCount);
        }

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StartError::AlreadyRunning);
        }
        self.cancel.store(false, Ordering::SeqCst);

        let run_id = Uuid::new_v4();
        let (sink, events) = EventSink::channel();
        let span = info_span!("run", run_id = %run_id, query = %query, source = %params.source);

        let worker = RunWorker {
            run_id,
            query: query.to_string(),
            source: self.sources.get(params.source),
            params,
            fetcher: self.fetcher.clone(),
            cancel: self.cancel.clone(),
            events: sink,
            active: Some(ActiveGuard(self.active.clone())),
        };
        let worker = tokio::spawn(worker.run().instrument(span));

        Ok(RunHandle { run_id, events, worker })
    }
}

/// What became of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Accepted,
    Failed,
    Skipped,
    Cancelled,
}

/// Validated image plus the preview to send with it.
struct Prepared {
    normalized: NormalizedImage,
    preview: Vec<u8>,
}

struct RunWorker {
    run_id: Uuid,
    query: String,
    params: RunParameters,
    source: Arc<dyn ImageSource>,
    fetcher: CandidateFetcher,
    cancel: Arc<AtomicBool>,
    events: EventSink,
    active: Option<ActiveGuard>,
}

impl RunWorker {
    async fn run(mut self) -> RunState {
        let mut state = RunState::default();
        let target = self.params.target_count;
        let kind = self.source.kind();
        log_run(self.run_id, &self.query, kind, RunStatus::Started);

        self.events.log(format!("Using {} for high-res images...", kind.display_name()));
        let discovery = self.source.search(&self.query, target, &self.events).await;
        self.events.log(format!(
            "{}: Got {} image URLs.",
            kind.display_name(),
            discovery.candidates.len()
        ));
        debug!("Discovery stopped: {:?}", discovery.stop);

        for locator in &discovery.candidates {
            if state.downloaded_count >= target || self.is_cancelled() {
                break;
            }

            let outcome = match self.source.save_mode() {
                SaveMode::StreamToFile => self.stream_candidate(locator, &mut state).await,
                SaveMode::DecodeThenSave => self.decode_candidate(locator, &mut state).await,
            };
            debug!("Candidate {} -> {:?}", short_url(locator), outcome);

            if outcome == Outcome::Cancelled || state.downloaded_count >= target {
                break;
            }
        }

        state.cancelled = self.is_cancelled();
        // Release before Finished so a caller reacting to it can start again.
        self.active.take();

        if state.cancelled {
            log_run(self.run_id, &self.query, kind, RunStatus::Cancelled);
        } else {
            self.events.finished(state.downloaded_count, state.error_count);
            log_run(self.run_id, &self.query, kind, RunStatus::Completed);
        }
        log_run_summary(self.run_id, state.downloaded_count, state.error_count, state.cancelled);

        state
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Streams the candidate into its final file, then validates it in place.
    async fn stream_candidate(&self, locator: &str, state: &mut RunState) -> Outcome {
        let sequence_number = state.next_sequence();
        let extension = normalizer::extension_from_locator(locator);
        let path = io::image_path(&self.params.destination, &self.query, sequence_number, &extension);

        if let Err(e) = self.fetcher.fetch_to_file(locator, &path).await {
            return self.fetch_failed(locator, e, state);
        }

        let prepared = {
            let path = path.clone();
            let extension = extension.clone();
            run_blocking(move || {
                let bytes = std::fs::read(&path)?;
                let prepared = prepare(&bytes)?;
                if prepared.normalized.upscaled_to.is_some() {
                    normalizer::save_image(
                        &prepared.normalized.image,
                        &path,
                        &extension,
                        prepared.normalized.format,
                    )?;
                }
                Ok(prepared)
            })
            .await
        };

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                state.record_error();
                self.events.warn(format!(
                    "Skipped (not a valid image after save): {}... | Error: {}",
                    short_url(locator),
                    e
                ));
                let _ = io::discard(&path).await;
                return Outcome::Failed;
            }
        };

        if self.is_cancelled() {
            let _ = io::discard(&path).await;
            return Outcome::Cancelled;
        }

        self.accept(locator, sequence_number, path, prepared, state)
    }

    /// Decodes the candidate in memory and writes it in the format it
    /// decoded as, unless the caller's type filter says otherwise.
    async fn decode_candidate(&self, locator: &str, state: &mut RunState) -> Outcome {
        let data = match self.fetcher.fetch(locator).await {
            Ok(data) => data,
            Err(e) => return self.fetch_failed(locator, e, state),
        };

        let prepared = match run_blocking(move || prepare(&data)).await {
            Ok(prepared) => prepared,
            Err(e) => {
                state.record_error();
                self.events.warn(format!(
                    "Skipped (not a valid image): {}... | Error: {}",
                    short_url(locator),
                    e
                ));
                return Outcome::Failed;
            }
        };

        let detected = normalizer::extension_for_format(prepared.normalized.format);
        let extension = match self.params.file_type.forced_extension() {
            Some(forced) => {
                if forced != detected {
                    self.events.log(format!(
                        "Type mismatch: Detected {}, saving as {} for {}...",
                        detected,
                        forced,
                        short_url(locator)
                    ));
                }
                forced.to_string()
            }
            None => detected,
        };

        if self.is_cancelled() {
            return Outcome::Cancelled;
        }

        let sequence_number = state.next_sequence();
        let path = io::image_path(&self.params.destination, &self.query, sequence_number, &extension);

        let saved = {
            let path = path.clone();
            run_blocking(move || {
                normalizer::save_image(
                    &prepared.normalized.image,
                    &path,
                    &extension,
                    prepared.normalized.format,
                )?;
                Ok(prepared)
            })
            .await
        };

        match saved {
            Ok(prepared) => self.accept(locator, sequence_number, path, prepared, state),
            Err(e) => {
                state.record_error();
                self.events.warn(format!(
                    "Skipped: {}... | Save error: {}",
                    short_url(locator),
                    e
                ));
                let _ = io::discard(&path).await;
                Outcome::Failed
            }
        }
    }

    fn fetch_failed(&self, locator: &str, error: FetchError, state: &mut RunState) -> Outcome {
        if error.is_skip() {
            debug!("Skipping {}: {}", short_url(locator), error);
            return Outcome::Skipped;
        }

        state.record_error();
        match error {
            FetchError::Status(code) => {
                self.events.warn(format!("Skipped: {}... | HTTP {}", short_url(locator), code));
            }
            other => {
                self.events.warn(format!(
                    "Skipped: {}... | Download error: {}",
                    short_url(locator),
                    other
                ));
            }
        }
        Outcome::Failed
    }

    fn accept(
        &self,
        locator: &str,
        sequence_number: usize,
        path: PathBuf,
        prepared: Prepared,
        state: &mut RunState,
    ) -> Outcome {
        let Prepared { normalized, preview } = prepared;

        if let Some((width, height)) = normalized.upscaled_to {
            self.events.log(format!(
                "Upscaled image to ({}, {}) for {}...",
                width,
                height,
                short_url(locator)
            ));
        }

        state.record_accepted(AcceptedImage {
            sequence_number,
            file_path: path,
            pixel_width: normalized.width(),
            pixel_height: normalized.height(),
            source_locator: locator.to_string(),
        });
        self.events.progress(state.downloaded_count);
        self.events.thumbnail(preview);

        Outcome::Accepted
    }
}

/// Validates bytes and builds the preview. Falls back to the leading bytes
/// of the payload if the preview cannot be encoded.
fn prepare(bytes: &[u8]) -> NormalizeResult<Prepared> {
    let normalized = normalizer::validate(bytes)?;
    let preview = normalizer::preview_bytes(&normalized.image)
        .unwrap_or_else(|_| bytes[..bytes.len().min(RAW_PREVIEW_BYTES)].to_vec());

    Ok(Prepared { normalized, preview })
}

/// Runs decode/resize/encode work off the async threads.
async fn run_blocking<T, F>(work: F) -> NormalizeResult<T>
where
    F: FnOnce() -> NormalizeResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| NormalizeError::TaskJoin(e.to_string()))?
}

//! Tracking abstraction layer for runlog.
//!
//! This crate defines the contracts a training-metrics writer forwards to:
//! a local summary writer that persists scalars on disk, and a remote
//! experiment-tracking session that mirrors them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A flat `{key: value}` payload sent to a tracking session.
pub type Payload = Map<String, Value>;

/// Represents an error raised by a remote tracking client.
#[derive(Error, Debug)]
pub enum TrackingError {
    /// No client is available to talk to the tracking service.
    #[error("Tracking service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The request could not be sent (network issues, invalid request).
    #[error("Request Error: {0}")]
    Request(String),

    /// The service answered with a non-success status.
    #[error("Tracking service returned {status}: {body}")]
    Response {
        /// HTTP status code (or equivalent).
        status: u16,
        /// Response body, as returned by the service.
        body: String,
    },

    /// A payload could not be serialized or a response could not be parsed.
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// A local file involved in the call could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for TrackingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Represents an error raised by a local summary writer.
#[derive(Error, Debug)]
pub enum SummaryError {
    /// I/O error while writing or reading an event file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A record could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A record failed its integrity check.
    #[error("Corrupt event file {path} at offset {offset}: {reason}")]
    Corrupt {
        /// The file that was being read.
        path: PathBuf,
        /// Byte offset of the offending record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// The writer was already closed.
    #[error("Summary writer is closed")]
    Closed,
}

/// Identity of a remote tracking session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Project the run belongs to.
    pub project: String,
    /// Owning user or team. `None` lets the service pick the default entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Display name of the run.
    pub run_name: String,
}

/// A video file to attach to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSpec {
    /// Path of the encoded video on the local filesystem.
    pub path: PathBuf,
    /// Playback frame rate.
    pub fps: u32,
    /// Container format, e.g. `mp4`.
    pub format: String,
}

impl VideoSpec {
    /// Creates an mp4 video spec.
    #[must_use]
    pub fn mp4(path: PathBuf, fps: u32) -> Self {
        Self { path, fps, format: "mp4".to_string() }
    }
}

/// Local, durable storage for scalar metrics.
///
/// Implementations must persist every accepted scalar by the time `close`
/// returns.
pub trait SummaryWriter: Send {
    /// Records a scalar value.
    ///
    /// # Arguments
    /// * `tag` - Series name, e.g. `Loss/value_function`
    /// * `value` - The scalar
    /// * `step` - Global step; implementations choose a default when absent
    /// * `walltime` - Seconds since the Unix epoch; defaults to now
    /// * `new_style` - Store the value as a tensor rather than a simple value
    fn add_scalar(
        &mut self,
        tag: &str,
        value: f64,
        step: Option<u64>,
        walltime: Option<f64>,
        new_style: bool,
    ) -> Result<(), SummaryError>;

    /// Flushes buffered records to disk.
    fn flush(&mut self) -> Result<(), SummaryError>;

    /// Flushes and releases the underlying storage.
    fn close(&mut self) -> Result<(), SummaryError>;

    /// Directory the writer stores its files in.
    fn log_dir(&self) -> &Path;
}

/// An open run on a remote tracking service.
///
/// Every method blocks until the service has accepted the call. Errors are
/// never retried by callers.
pub trait TrackingSession: Send {
    /// Merges `values` into the run configuration. Existing keys are
    /// overwritten, no key is ever removed.
    fn update_config(&mut self, values: Payload) -> Result<(), TrackingError>;

    /// Logs a row of metrics. `None` logs at the session's current step.
    fn log(&mut self, values: Payload, step: Option<u64>) -> Result<(), TrackingError>;

    /// Uploads `path` to the run's file store, named relative to `base_path`.
    fn save_file(&mut self, path: &Path, base_path: &Path) -> Result<(), TrackingError>;

    /// Uploads a video and logs it under `key`.
    fn log_video(
        &mut self,
        key: &str,
        video: &VideoSpec,
        step: Option<u64>,
    ) -> Result<(), TrackingError>;

    /// Marks the run as finished.
    fn finish(&mut self) -> Result<(), TrackingError>;
}

/// Factory for remote tracking sessions.
pub trait TrackingClient: Send + Sync {
    /// Short identifier of the backend (e.g. `wandb`).
    fn id(&self) -> &'static str;

    /// Opens (or resumes) the run described by `spec`.
    fn open_session(&self, spec: &SessionSpec) -> Result<Box<dyn TrackingSession>, TrackingError>;
}

/// Returns the relative name of `path` under `base_path`, falling back to
/// the file name when `path` is not inside `base_path`.
#[must_use]
pub fn relative_name(path: &Path, base_path: &Path) -> String {
    let rel = path
        .strip_prefix(base_path)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| path.file_name().map(Path::new))
        .unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

const NON_FINITE_TOKENS: [&str; 3] = ["NaN", "Infinity", "-Infinity"];

/// JSON value for a logged scalar.
///
/// JSON has no NaN or infinities, so those are carried as the strings
/// `"NaN"`, `"Infinity"` and `"-Infinity"`.
#[must_use]
pub fn scalar_value(value: f64) -> Value {
    if value.is_nan() {
        Value::from(NON_FINITE_TOKENS[0])
    } else if value.is_infinite() {
        Value::from(if value > 0.0 { NON_FINITE_TOKENS[1] } else { NON_FINITE_TOKENS[2] })
    } else {
        Value::from(value)
    }
}

/// The non-finite token carried by `value`, if it is one.
#[must_use]
pub fn non_finite_token(value: &Value) -> Option<&'static str> {
    let s = value.as_str()?;
    NON_FINITE_TOKENS.iter().copied().find(|t| *t == s)
}

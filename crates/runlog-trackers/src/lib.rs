//! Tracking client implementations for runlog.
//!
//! This crate provides concrete implementations of the `TrackingClient` trait.
//!
//! # Supported Backends
//!
//! - **Recording**: in-memory journal for tests and dry runs
//! - **Weights & Biases**: hosted or self-managed W&B server (API key required)

pub mod factory;
pub mod wandb;

use runlog_abstraction::{
    Payload, SessionSpec, TrackingClient, TrackingError, TrackingSession, VideoSpec,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub use factory::{TrackerConfig, TrackerFactory, TrackerType};
pub use wandb::{WandbClient, WandbSettings};

/// A single call observed by a `RecordingClient`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum RecordedCall {
    OpenSession(SessionSpec),
    UpdateConfig(Payload),
    Log { values: Payload, step: Option<u64> },
    SaveFile { path: PathBuf, base_path: PathBuf },
    LogVideo { key: String, video: VideoSpec, step: Option<u64> },
    Finish,
}

/// Kinds of calls, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    OpenSession,
    UpdateConfig,
    Log,
    SaveFile,
    LogVideo,
    Finish,
}

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<RecordedCall>,
    fail_on: Option<CallKind>,
}

impl Journal {
    fn record(&mut self, kind: CallKind, call: RecordedCall) -> Result<(), TrackingError> {
        if self.fail_on == Some(kind) {
            return Err(TrackingError::Request(format!("injected failure on {kind:?}")));
        }
        self.calls.push(call);
        Ok(())
    }
}

/// An in-memory `TrackingClient` that records every call it receives.
///
/// Clones share the same journal, so a test can keep one handle while the
/// writer owns the session.
#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    journal: Arc<Mutex<Journal>>,
}

impl RecordingClient {
    /// Creates a client with an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `kind` fail with `TrackingError::Request`.
    pub fn fail_on(&self, kind: CallKind) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.fail_on = Some(kind);
        }
    }

    /// All recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.journal.lock().map(|j| j.calls.clone()).unwrap_or_default()
    }

    /// The run configuration as the service would see it.
    #[must_use]
    pub fn config(&self) -> Payload {
        let mut merged = Payload::new();
        for call in self.calls() {
            if let RecordedCall::UpdateConfig(values) = call {
                merged.extend(values);
            }
        }
        merged
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::OpenSession(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Logged rows with their steps.
    #[must_use]
    pub fn logs(&self) -> Vec<(Payload, Option<u64>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Log { values, step } => Some((values, step)),
                _ => None,
            })
            .collect()
    }

    /// Uploaded videos with their steps.
    #[must_use]
    pub fn videos(&self) -> Vec<(VideoSpec, Option<u64>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::LogVideo { video, step, .. } => Some((video, step)),
                _ => None,
            })
            .collect()
    }

    /// Number of times a session was finished.
    #[must_use]
    pub fn finish_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, RecordedCall::Finish)).count()
    }
}

impl TrackingClient for RecordingClient {
    fn id(&self) -> &'static str {
        "recording"
    }

    fn open_session(&self, spec: &SessionSpec) -> Result<Box<dyn TrackingSession>, TrackingError> {
        debug!(project = %spec.project, run_name = %spec.run_name, "RecordingClient opening session");

        self.with_journal(|j| j.record(CallKind::OpenSession, RecordedCall::OpenSession(spec.clone())))?;
        Ok(Box::new(RecordingSession { journal: Arc::clone(&self.journal) }))
    }
}

impl RecordingClient {
    fn with_journal<T>(
        &self,
        f: impl FnOnce(&mut Journal) -> Result<T, TrackingError>,
    ) -> Result<T, TrackingError> {
        lock_journal(&self.journal, f)
    }
}

fn lock_journal<T>(
    journal: &Mutex<Journal>,
    f: impl FnOnce(&mut Journal) -> Result<T, TrackingError>,
) -> Result<T, TrackingError> {
    let mut guard = journal
        .lock()
        .map_err(|_| TrackingError::Other(anyhow::anyhow!("recording journal poisoned")))?;
    f(&mut *guard)
}

/// Session handed out by `RecordingClient`.
#[derive(Debug)]
pub struct RecordingSession {
    journal: Arc<Mutex<Journal>>,
}

impl TrackingSession for RecordingSession {
    fn update_config(&mut self, values: Payload) -> Result<(), TrackingError> {
        lock_journal(&self.journal, |j| {
            j.record(CallKind::UpdateConfig, RecordedCall::UpdateConfig(values))
        })
    }

    fn log(&mut self, values: Payload, step: Option<u64>) -> Result<(), TrackingError> {
        lock_journal(&self.journal, |j| j.record(CallKind::Log, RecordedCall::Log { values, step }))
    }

    fn save_file(&mut self, path: &Path, base_path: &Path) -> Result<(), TrackingError> {
        lock_journal(&self.journal, |j| {
            j.record(
                CallKind::SaveFile,
                RecordedCall::SaveFile { path: path.to_path_buf(), base_path: base_path.to_path_buf() },
            )
        })
    }

    fn log_video(
        &mut self,
        key: &str,
        video: &VideoSpec,
        step: Option<u64>,
    ) -> Result<(), TrackingError> {
        lock_journal(&self.journal, |j| {
            j.record(
                CallKind::LogVideo,
                RecordedCall::LogVideo { key: key.to_string(), video: video.clone(), step },
            )
        })
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        lock_journal(&self.journal, |j| j.record(CallKind::Finish, RecordedCall::Finish))
    }
}

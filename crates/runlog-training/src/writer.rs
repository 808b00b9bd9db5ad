use crate::config::TrackingConfig;
use crate::env_config::EnvConfig;
use crate::error::{WriterError, WriterResult};
use crate::event_file::EventFileWriter;
use crate::videos::VideoRegistry;
use runlog_abstraction::{
    scalar_value, Payload, SessionSpec, SummaryWriter, TrackingClient, TrackingSession, VideoSpec,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tag under which scanned videos are logged.
const VIDEO_KEY: &str = "Video";

/// Writes scalars to a local summary writer and mirrors every call to a
/// remote tracking run.
///
/// Created through [`MetricsWriter::builder`]. `stop` consumes the writer, so
/// the remote run is finished at most once.
pub struct MetricsWriter {
    log_dir: PathBuf,
    run_name: String,
    summary: Box<dyn SummaryWriter>,
    session: Box<dyn TrackingSession>,
    videos: VideoRegistry,
    stopped: bool,
}

/// Builder for [`MetricsWriter`].
pub struct MetricsWriterBuilder {
    log_dir: PathBuf,
    flush_secs: u64,
    config: Value,
    client: Option<Arc<dyn TrackingClient>>,
    summary: Option<Box<dyn SummaryWriter>>,
}

impl MetricsWriterBuilder {
    /// Seconds between automatic flushes of the local event file.
    #[must_use]
    pub fn flush_secs(mut self, flush_secs: u64) -> Self {
        self.flush_secs = flush_secs;
        self
    }

    /// Runner config holding `wandb_project` and optionally `wandb_entity`.
    #[must_use]
    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// The remote tracking client. Required.
    #[must_use]
    pub fn client(mut self, client: Arc<dyn TrackingClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Replaces the default TensorBoard event-file writer.
    #[must_use]
    pub fn summary_writer(mut self, summary: Box<dyn SummaryWriter>) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Validates the config, opens local storage and starts the remote run.
    ///
    /// Nothing is sent to the tracking service unless the config is valid
    /// and a client was supplied.
    pub fn build(self) -> WriterResult<MetricsWriter> {
        let run_name = run_name(&self.log_dir)?;
        let tracking = TrackingConfig::from_mapping(&self.config)?;
        let client = self.client.ok_or_else(|| {
            WriterError::ServiceUnavailable("no tracking client was supplied".to_string())
        })?;

        let summary = match self.summary {
            Some(summary) => summary,
            None => Box::new(EventFileWriter::open(&self.log_dir, self.flush_secs)?),
        };

        let spec = SessionSpec { project: tracking.project, entity: tracking.entity, run_name };
        debug!(
            client = client.id(),
            project = %spec.project,
            entity = ?spec.entity,
            run_name = %spec.run_name,
            "Opening tracking session"
        );
        let mut session = client.open_session(&spec)?;

        let mut log_dir_cfg = Payload::new();
        log_dir_cfg.insert("log_dir".to_string(), json!(self.log_dir.to_string_lossy()));
        session.update_config(log_dir_cfg)?;

        info!(
            client = client.id(),
            project = %spec.project,
            run_name = %spec.run_name,
            log_dir = %self.log_dir.display(),
            "Metrics writer started"
        );

        Ok(MetricsWriter {
            log_dir: self.log_dir,
            run_name: spec.run_name,
            summary,
            session,
            videos: VideoRegistry::new(),
            stopped: false,
        })
    }
}

fn run_name(log_dir: &Path) -> WriterResult<String> {
    log_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            WriterError::Config(format!("log_dir {} has no final path component", log_dir.display()))
        })
}

fn fragment(train_cfg: &Value, key: &str) -> WriterResult<Value> {
    train_cfg.get(key).cloned().ok_or_else(|| WriterError::missing(key))
}

impl MetricsWriter {
    /// Starts building a writer for `log_dir`.
    #[must_use]
    pub fn builder(log_dir: impl Into<PathBuf>) -> MetricsWriterBuilder {
        MetricsWriterBuilder {
            log_dir: log_dir.into(),
            flush_secs: 10,
            config: Value::Null,
            client: None,
            summary: None,
        }
    }

    /// Shorthand for the builder with the default event-file writer.
    pub fn initialize(
        log_dir: impl Into<PathBuf>,
        flush_secs: u64,
        config: Value,
        client: Arc<dyn TrackingClient>,
    ) -> WriterResult<Self> {
        Self::builder(log_dir).flush_secs(flush_secs).config(config).client(client).build()
    }

    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Name of the remote run, the last component of `log_dir`.
    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    #[must_use]
    pub fn video_registry(&self) -> &VideoRegistry {
        &self.videos
    }

    /// Pushes the runner, policy, algorithm and environment configs to the
    /// remote run under `runner_cfg`, `policy_cfg`, `alg_cfg` and `env_cfg`.
    ///
    /// `train_cfg` must contain `policy` and `algorithm`.
    pub fn store_config(&mut self, env_cfg: &EnvConfig<'_>, train_cfg: &Value) -> WriterResult<()> {
        let fragments = [
            ("runner_cfg", train_cfg.clone()),
            ("policy_cfg", fragment(train_cfg, "policy")?),
            ("alg_cfg", fragment(train_cfg, "algorithm")?),
            ("env_cfg", env_cfg.resolve()?),
        ];

        for (key, value) in fragments {
            let mut update = Payload::new();
            update.insert(key.to_string(), value);
            self.session.update_config(update)?;
        }
        debug!(run_name = %self.run_name, "Stored training configuration");
        Ok(())
    }

    /// Writes a scalar locally, then logs `{tag: value}` to the remote run at `step`.
    ///
    /// Non-finite values are mirrored as `"NaN"`, `"Infinity"` or `"-Infinity"`.
    pub fn add_scalar(
        &mut self,
        tag: &str,
        value: f64,
        step: Option<u64>,
        walltime: Option<f64>,
        new_style: bool,
    ) -> WriterResult<()> {
        self.summary.add_scalar(tag, value, step, walltime, new_style)?;

        let mut row = Payload::new();
        row.insert(tag.to_string(), scalar_value(value));
        self.session.log(row, step)?;
        Ok(())
    }

    /// Flushes the local summary writer.
    pub fn flush(&mut self) -> WriterResult<()> {
        self.summary.flush()?;
        Ok(())
    }

    /// Finishes the remote run. Local storage is flushed when the writer is dropped.
    pub fn stop(mut self) -> WriterResult<()> {
        self.session.finish()?;
        self.stopped = true;
        info!(run_name = %self.run_name, "Metrics writer stopped");
        Ok(())
    }

    /// Uploads a model checkpoint, named relative to its directory.
    pub fn save_model(&mut self, path: &Path, iteration: u64) -> WriterResult<()> {
        debug!(path = %path.display(), iteration, "Uploading model checkpoint");
        self.save_file(path)
    }

    /// Uploads a file, named relative to its directory.
    pub fn save_file(&mut self, path: &Path) -> WriterResult<()> {
        let base_path = path.parent().unwrap_or_else(|| Path::new(""));
        self.session.save_file(path, base_path)?;
        Ok(())
    }

    /// Uploads every `.mp4` under `dir` whose file name has not been uploaded
    /// yet, logged as `Video` at `step`. Returns how many were uploaded.
    pub fn add_video_files(&mut self, dir: &Path, step: u64, fps: u32) -> WriterResult<usize> {
        let mut uploaded = 0;
        for (name, path) in self.videos.scan(dir) {
            self.videos.register(&name);
            debug!(video = %path.display(), step, "Uploading video");
            self.session.log_video(VIDEO_KEY, &VideoSpec::mp4(path, fps), Some(step))?;
            uploaded += 1;
        }
        Ok(uploaded)
    }
}

impl Drop for MetricsWriter {
    fn drop(&mut self) {
        if !self.stopped {
            warn!(run_name = %self.run_name, "Metrics writer dropped without stop(); remote run left open");
        }
    }
}

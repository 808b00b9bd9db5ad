//! Logger selection for training loops.
//!
//! A runner config picks its logger with the `logger` key. TensorBoard-only
//! runs get a plain event-file writer; `wandb` runs get a `MetricsWriter`.

use crate::config::LOGGER_KEY;
use crate::env_config::EnvConfig;
use crate::error::{WriterError, WriterResult};
use crate::event_file::EventFileWriter;
use crate::writer::MetricsWriter;
use runlog_abstraction::{SummaryWriter, TrackingClient};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Logger backend enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggerType {
    /// Local TensorBoard event files only.
    #[default]
    Tensorboard,
    /// TensorBoard event files mirrored to Weights & Biases.
    Wandb,
}

impl FromStr for LoggerType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tensorboard" => Ok(Self::Tensorboard),
            "wandb" => Ok(Self::Wandb),
            _ => Err(()),
        }
    }
}

impl LoggerType {
    /// Reads the `logger` key of a runner config, defaulting to TensorBoard.
    pub fn from_config(cfg: &Value) -> WriterResult<Self> {
        match cfg.get(LOGGER_KEY) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::String(name)) => Self::from_str(name)
                .map_err(|()| WriterError::Config(format!("unsupported logger type: {name}"))),
            Some(other) => Err(WriterError::Config(format!("{LOGGER_KEY} must be a string, got {other}"))),
        }
    }
}

/// What a training loop needs from its logger.
pub trait TrainingLogger: Send {
    fn add_scalar(&mut self, tag: &str, value: f64, step: Option<u64>) -> WriterResult<()>;

    fn store_config(&mut self, env_cfg: &EnvConfig<'_>, train_cfg: &Value) -> WriterResult<()>;

    fn save_model(&mut self, path: &Path, iteration: u64) -> WriterResult<()>;

    fn save_file(&mut self, path: &Path) -> WriterResult<()>;

    fn add_video_files(&mut self, dir: &Path, step: u64, fps: u32) -> WriterResult<usize>;

    fn stop(self: Box<Self>) -> WriterResult<()>;
}

// Event files have nowhere to put configs, files or videos.
impl TrainingLogger for EventFileWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: Option<u64>) -> WriterResult<()> {
        SummaryWriter::add_scalar(self, tag, value, step, None, false)?;
        Ok(())
    }

    fn store_config(&mut self, _env_cfg: &EnvConfig<'_>, _train_cfg: &Value) -> WriterResult<()> {
        Ok(())
    }

    fn save_model(&mut self, _path: &Path, _iteration: u64) -> WriterResult<()> {
        Ok(())
    }

    fn save_file(&mut self, _path: &Path) -> WriterResult<()> {
        Ok(())
    }

    fn add_video_files(&mut self, _dir: &Path, _step: u64, _fps: u32) -> WriterResult<usize> {
        Ok(0)
    }

    fn stop(mut self: Box<Self>) -> WriterResult<()> {
        SummaryWriter::close(&mut *self)?;
        Ok(())
    }
}

impl TrainingLogger for MetricsWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: Option<u64>) -> WriterResult<()> {
        Self::add_scalar(self, tag, value, step, None, false)
    }

    fn store_config(&mut self, env_cfg: &EnvConfig<'_>, train_cfg: &Value) -> WriterResult<()> {
        Self::store_config(self, env_cfg, train_cfg)
    }

    fn save_model(&mut self, path: &Path, iteration: u64) -> WriterResult<()> {
        Self::save_model(self, path, iteration)
    }

    fn save_file(&mut self, path: &Path) -> WriterResult<()> {
        Self::save_file(self, path)
    }

    fn add_video_files(&mut self, dir: &Path, step: u64, fps: u32) -> WriterResult<usize> {
        Self::add_video_files(self, dir, step, fps)
    }

    fn stop(self: Box<Self>) -> WriterResult<()> {
        Self::stop(*self)
    }
}

/// Builds the logger selected by `cfg`.
///
/// `client` is only consulted for remote loggers; a `wandb` config without a
/// client fails with `ServiceUnavailable`.
pub fn create_logger(
    log_dir: impl Into<PathBuf>,
    flush_secs: u64,
    cfg: &Value,
    client: Option<Arc<dyn TrackingClient>>,
) -> WriterResult<Box<dyn TrainingLogger>> {
    let log_dir = log_dir.into();
    let logger_type = LoggerType::from_config(cfg)?;
    debug!(logger_type = ?logger_type, log_dir = %log_dir.display(), "Creating training logger");

    match logger_type {
        LoggerType::Tensorboard => Ok(Box::new(EventFileWriter::open(&log_dir, flush_secs)?)),
        LoggerType::Wandb => {
            let mut builder = MetricsWriter::builder(log_dir).flush_secs(flush_secs).config(cfg.clone());
            if let Some(client) = client {
                builder = builder.client(client);
            }
            Ok(Box::new(builder.build()?))
        }
    }
}

//! Runlog Training
//!
//! Metric logging for training loops:
//! - Writing scalars to TensorBoard event files (`EventFileWriter`)
//! - Mirroring scalars, files and videos to a remote tracking run (`MetricsWriter`)
//! - Loading runner configuration and picking a logger (`create_logger`)

pub mod config;
pub mod env_config;
pub mod error;
pub mod event_file;
pub mod logger;
pub mod proto;
pub mod record;
pub mod videos;
pub mod writer;

pub use config::{load_mapping, TrackingConfig, ENTITY_KEY, LOGGER_KEY, PROJECT_KEY};
pub use env_config::{EnvConfig, ToMapping};
pub use error::{WriterError, WriterResult};
pub use event_file::{read_events, EventFileWriter};
pub use logger::{create_logger, LoggerType, TrainingLogger};
pub use videos::{VideoRegistry, DEFAULT_VIDEO_FPS, VIDEO_EXTENSION};
pub use writer::{MetricsWriter, MetricsWriterBuilder};

pub use runlog_abstraction::{SummaryError, SummaryWriter, TrackingClient, TrackingError};

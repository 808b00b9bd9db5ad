use crate::proto::{event, summary, Event, Summary, FILE_VERSION};
use crate::record::{read_records, write_record};
use chrono::Utc;
use prost::Message;
use runlog_abstraction::{SummaryError, SummaryWriter};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[allow(clippy::cast_precision_loss)]
fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Writes scalar summaries to a TensorBoard event file.
///
/// Records are buffered and flushed once `flush_secs` have passed since the
/// previous flush, on `flush`/`close`, and on drop.
#[derive(Debug)]
pub struct EventFileWriter {
    log_dir: PathBuf,
    path: PathBuf,
    out: Option<BufWriter<File>>,
    flush_interval: Duration,
    last_flush: Instant,
}

impl EventFileWriter {
    /// Creates `log_dir` if needed and starts a new event file in it.
    pub fn open(log_dir: impl AsRef<Path>, flush_secs: u64) -> Result<Self, SummaryError> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)?;

        let name = format!(
            "events.out.tfevents.{}.{}.{}.{}",
            Utc::now().timestamp(),
            gethostname::gethostname().to_string_lossy(),
            std::process::id(),
            FILE_COUNTER.fetch_add(1, Ordering::Relaxed),
        );
        let path = log_dir.join(name);
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        let mut writer = Self {
            log_dir,
            path,
            out: Some(BufWriter::new(file)),
            flush_interval: Duration::from_secs(flush_secs),
            last_flush: Instant::now(),
        };
        writer.write_event(&Event {
            wall_time: now_secs(),
            step: 0,
            what: Some(event::What::FileVersion(FILE_VERSION.to_string())),
        })?;
        writer.flush()?;

        debug!(path = %writer.path.display(), flush_secs, "Opened event file");
        Ok(writer)
    }

    /// Path of the event file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &Event) -> Result<(), SummaryError> {
        let out = self.out.as_mut().ok_or(SummaryError::Closed)?;
        write_record(out, &event.encode_to_vec())?;

        if self.last_flush.elapsed() >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }
}

impl SummaryWriter for EventFileWriter {
    fn add_scalar(
        &mut self,
        tag: &str,
        value: f64,
        step: Option<u64>,
        walltime: Option<f64>,
        new_style: bool,
    ) -> Result<(), SummaryError> {
        let step = step
            .map_or(Ok(0), i64::try_from)
            .map_err(|_| SummaryError::Encode(format!("step {step:?} does not fit in an event record")))?;
        let value = value as f32;
        let summary_value = if new_style {
            summary::Value::scalar_tensor(tag, value)
        } else {
            summary::Value::simple(tag, value)
        };

        self.write_event(&Event {
            wall_time: walltime.unwrap_or_else(now_secs),
            step,
            what: Some(event::What::Summary(Summary { value: vec![summary_value] })),
        })
    }

    fn flush(&mut self) -> Result<(), SummaryError> {
        if let Some(out) = self.out.as_mut() {
            out.flush()?;
        }
        self.last_flush = Instant::now();
        Ok(())
    }

    fn close(&mut self) -> Result<(), SummaryError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            debug!(path = %self.path.display(), "Closed event file");
        }
        Ok(())
    }

    fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl Drop for EventFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "Failed to flush event file on drop");
        }
    }
}

/// Reads every event stored in `path`, verifying record checksums.
pub fn read_events(path: &Path) -> Result<Vec<Event>, SummaryError> {
    let bytes = std::fs::read(path)?;
    read_records(&bytes, path)?
        .into_iter()
        .map(|data| Event::decode(data).map_err(|e| SummaryError::Decode(e.to_string())))
        .collect()
}

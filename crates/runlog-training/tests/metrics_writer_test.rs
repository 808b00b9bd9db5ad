//! Integration tests for `MetricsWriter` against the recording tracker.
//!
//! These tests verify:
//! - Session setup and config validation
//! - Config fragments pushed by `store_config`
//! - Local and remote scalar writes
//! - Video upload de-duplication
//! - Remote errors propagating to the caller
//! - Non-finite scalars staying distinct remotely

use runlog_abstraction::{SummaryError, SummaryWriter, TrackingError};
use runlog_trackers::{CallKind, RecordedCall, RecordingClient};
use runlog_training::proto::event;
use runlog_training::{
    read_events, EnvConfig, MetricsWriter, ToMapping, WriterError, DEFAULT_VIDEO_FPS,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type ScalarLog = Arc<Mutex<Vec<(String, f64, Option<u64>)>>>;

/// Summary writer that keeps scalars in memory.
#[derive(Default)]
struct MemorySummary {
    log_dir: PathBuf,
    scalars: ScalarLog,
}

impl SummaryWriter for MemorySummary {
    fn add_scalar(
        &mut self,
        tag: &str,
        value: f64,
        step: Option<u64>,
        _walltime: Option<f64>,
        _new_style: bool,
    ) -> Result<(), SummaryError> {
        self.scalars.lock().unwrap().push((tag.to_string(), value, step));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SummaryError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SummaryError> {
        Ok(())
    }

    fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

fn cfg() -> Value {
    json!({"wandb_project": "legged_gym", "wandb_entity": "rsl"})
}

fn writer_with_memory(client: &RecordingClient, log_dir: &Path) -> (MetricsWriter, ScalarLog) {
    let scalars = ScalarLog::default();
    let summary = MemorySummary { log_dir: log_dir.to_path_buf(), scalars: Arc::clone(&scalars) };
    let writer = MetricsWriter::builder(log_dir)
        .config(cfg())
        .client(Arc::new(client.clone()))
        .summary_writer(Box::new(summary))
        .build()
        .unwrap();
    (writer, scalars)
}

fn train_cfg() -> Value {
    json!({
        "num_steps_per_env": 24,
        "max_iterations": 1500,
        "policy": {"class_name": "ActorCritic", "actor_hidden_dims": [512, 256, 128]},
        "algorithm": {"class_name": "PPO", "gamma": 0.99, "lam": 0.95}
    })
}

#[test]
fn test_missing_project_fails_before_opening_session() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();

    let result = MetricsWriter::initialize(
        temp.path().join("run"),
        10,
        json!({"wandb_entity": "rsl"}),
        Arc::new(client.clone()),
    );

    match result {
        Err(WriterError::MissingConfiguration { key }) => assert_eq!(key, "wandb_project"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected MissingConfiguration"),
    }
    assert!(client.calls().is_empty());
    assert!(!temp.path().join("run").exists());
}

#[test]
fn test_missing_client_is_service_unavailable() {
    let temp = TempDir::new().unwrap();
    let result = MetricsWriter::builder(temp.path().join("run")).config(cfg()).build();
    assert!(matches!(result, Err(WriterError::ServiceUnavailable(_))));
}

#[test]
fn test_session_is_scoped_to_project_entity_and_run_name() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let log_dir = temp.path().join("2024-05-01_10-00-00_flat");

    let writer = MetricsWriter::initialize(
        &log_dir,
        10,
        json!({"wandb_project": "legged_gym"}),
        Arc::new(client.clone()),
    )
    .unwrap();

    let sessions = client.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].project, "legged_gym");
    assert_eq!(sessions[0].entity, None);
    assert_eq!(sessions[0].run_name, "2024-05-01_10-00-00_flat");
    assert_eq!(writer.run_name(), "2024-05-01_10-00-00_flat");
    assert_eq!(client.config()["log_dir"], json!(log_dir.to_string_lossy()));

    writer.stop().unwrap();
}

#[test]
fn test_store_config_pushes_four_fragments() {
    #[derive(Serialize)]
    struct EnvCfg {
        num_envs: u32,
        episode_length_s: f32,
    }

    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let (mut writer, _) = writer_with_memory(&client, &temp.path().join("run"));

    let env = EnvCfg { num_envs: 4096, episode_length_s: 20.0 };
    writer.store_config(&EnvConfig::record(&env).unwrap(), &train_cfg()).unwrap();

    let config = client.config();
    let mut keys: Vec<_> = config.keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["alg_cfg", "env_cfg", "log_dir", "policy_cfg", "runner_cfg"]);
    assert_eq!(config["runner_cfg"], train_cfg());
    assert_eq!(config["policy_cfg"], train_cfg()["policy"]);
    assert_eq!(config["alg_cfg"], train_cfg()["algorithm"]);
    assert_eq!(config["env_cfg"], json!({"num_envs": 4096, "episode_length_s": 20.0}));

    writer.stop().unwrap();
}

#[test]
fn test_store_config_uses_to_mapping_fallback() {
    struct Broken;

    impl ToMapping for Broken {
        fn to_mapping(&self) -> anyhow::Result<runlog_abstraction::Payload> {
            anyhow::bail!("not convertible")
        }

        fn to_record(&self) -> Option<Value> {
            Some(json!({"terrain": {"mesh_type": "plane"}}))
        }
    }

    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let (mut writer, _) = writer_with_memory(&client, &temp.path().join("run"));

    writer.store_config(&EnvConfig::from(&Broken), &train_cfg()).unwrap();
    assert_eq!(client.config()["env_cfg"]["terrain"]["mesh_type"], "plane");

    writer.stop().unwrap();
}

#[test]
fn test_add_scalar_writes_locally_and_logs_once() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let (mut writer, scalars) = writer_with_memory(&client, &temp.path().join("run"));

    writer.add_scalar("loss", 1.5, Some(10), None, false).unwrap();

    assert_eq!(*scalars.lock().unwrap(), vec![("loss".to_string(), 1.5, Some(10))]);
    let logs = client.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(Value::Object(logs[0].0.clone()), json!({"loss": 1.5}));
    assert_eq!(logs[0].1, Some(10));

    writer.stop().unwrap();
}

#[test]
fn test_add_scalar_persists_to_event_file() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("runlog_training=debug"))
        .with_test_writer()
        .try_init();

    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let log_dir = temp.path().join("run");

    let mut writer =
        MetricsWriter::initialize(&log_dir, 10, cfg(), Arc::new(client.clone())).unwrap();
    writer.add_scalar("Train/mean_reward", 3.25, Some(7), None, false).unwrap();
    writer.stop().unwrap();

    let event_file = std::fs::read_dir(&log_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("events.out.tfevents."))
        .unwrap();
    let events = read_events(&event_file).unwrap();
    let scalar = events
        .iter()
        .find_map(|e| match &e.what {
            Some(event::What::Summary(s)) => Some((e.step, s.value[0].tag.clone(), s.value[0].scalar())),
            _ => None,
        })
        .unwrap();
    assert_eq!(scalar, (7, "Train/mean_reward".to_string(), Some(3.25)));
}

#[test]
fn test_non_finite_scalars_stay_distinct_remotely() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let (mut writer, scalars) = writer_with_memory(&client, &temp.path().join("run"));

    writer.add_scalar("loss", f64::NAN, Some(1), None, false).unwrap();
    writer.add_scalar("kl", f64::INFINITY, Some(1), None, false).unwrap();
    writer.add_scalar("value", f64::NEG_INFINITY, Some(1), None, false).unwrap();

    let logs = client.logs();
    assert_eq!(Value::Object(logs[0].0.clone()), json!({"loss": "NaN"}));
    assert_eq!(Value::Object(logs[1].0.clone()), json!({"kl": "Infinity"}));
    assert_eq!(Value::Object(logs[2].0.clone()), json!({"value": "-Infinity"}));
    assert!(scalars.lock().unwrap()[0].1.is_nan());

    writer.stop().unwrap();
}

/// Log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[test]
fn test_failed_stop_still_reports_open_run() {
    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let temp = TempDir::new().unwrap();
        let client = RecordingClient::new();
        let (writer, _) = writer_with_memory(&client, &temp.path().join("run"));
        client.fail_on(CallKind::Finish);

        let err = writer.stop().unwrap_err();
        assert!(matches!(err, WriterError::Remote(TrackingError::Request(_))));
        assert_eq!(client.finish_count(), 0);
    });

    assert!(logs.contents().contains("remote run left open"));
}

#[test]
fn test_remote_failure_propagates() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let (mut writer, scalars) = writer_with_memory(&client, &temp.path().join("run"));
    client.fail_on(CallKind::Log);

    let err = writer.add_scalar("loss", 1.0, Some(1), None, false).unwrap_err();

    assert!(matches!(err, WriterError::Remote(TrackingError::Request(_))));
    // The local write happened before the remote call failed.
    assert_eq!(scalars.lock().unwrap().len(), 1);
}

#[test]
fn test_video_scan_uploads_each_video_once() {
    let temp = TempDir::new().unwrap();
    let videos = temp.path().join("videos").join("train");
    std::fs::create_dir_all(&videos).unwrap();
    std::fs::write(videos.join("rl-video-step-0.mp4"), b"v0").unwrap();
    std::fs::write(videos.join("rl-video-step-1500.mp4"), b"v1").unwrap();

    let client = RecordingClient::new();
    let (mut writer, _) = writer_with_memory(&client, &temp.path().join("run"));

    let first = writer.add_video_files(&temp.path().join("videos"), 10, DEFAULT_VIDEO_FPS).unwrap();
    let second = writer.add_video_files(&temp.path().join("videos"), 20, DEFAULT_VIDEO_FPS).unwrap();

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    let uploaded = client.videos();
    assert_eq!(uploaded.len(), 2);
    assert!(uploaded.iter().all(|(v, step)| v.fps == 30 && v.format == "mp4" && *step == Some(10)));
    assert_eq!(writer.video_registry().len(), 2);

    // A new file shows up between scans.
    std::fs::write(videos.join("rl-video-step-3000.mp4"), b"v2").unwrap();
    assert_eq!(writer.add_video_files(&temp.path().join("videos"), 30, 15).unwrap(), 1);
    assert_eq!(client.videos().last().unwrap().1, Some(30));

    writer.stop().unwrap();
}

#[test]
fn test_video_scan_of_missing_dir_is_noop() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let (mut writer, _) = writer_with_memory(&client, &temp.path().join("run"));

    let uploaded = writer.add_video_files(&temp.path().join("no-videos"), 1, DEFAULT_VIDEO_FPS).unwrap();

    assert_eq!(uploaded, 0);
    assert!(client.videos().is_empty());
    writer.stop().unwrap();
}

#[test]
fn test_save_model_is_rooted_at_parent_dir() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let log_dir = temp.path().join("run");
    let (mut writer, _) = writer_with_memory(&client, &log_dir);

    let model = log_dir.join("model_1500.pt");
    writer.save_model(&model, 1500).unwrap();
    writer.save_file(&log_dir.join("git").join("rsl_rl.diff")).unwrap();

    let saves: Vec<_> = client
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            RecordedCall::SaveFile { path, base_path } => Some((path, base_path)),
            _ => None,
        })
        .collect();
    assert_eq!(saves[0], (model, log_dir.clone()));
    assert_eq!(saves[1], (log_dir.join("git").join("rsl_rl.diff"), log_dir.join("git")));

    writer.stop().unwrap();
}

#[test]
fn test_stop_finishes_once_without_metrics() {
    let temp = TempDir::new().unwrap();
    let client = RecordingClient::new();
    let (writer, _) = writer_with_memory(&client, &temp.path().join("run"));

    writer.stop().unwrap();

    assert_eq!(client.finish_count(), 1);
    assert!(client.logs().is_empty());
}

use runlog_trackers::RecordingClient;
use runlog_training::{create_logger, load_mapping, EnvConfig, DEFAULT_VIDEO_FPS};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_wandb_logger_from_config_file() {
    let temp = TempDir::new().unwrap();
    let cfg_path = temp.path().join("runner.yaml");
    std::fs::write(
        &cfg_path,
        "logger: wandb\nwandb_project: legged_gym\npolicy:\n  init_noise_std: 1.0\nalgorithm:\n  clip_param: 0.2\n",
    )
    .unwrap();
    let cfg = load_mapping(&cfg_path).unwrap();

    let client = RecordingClient::new();
    let mut logger =
        create_logger(temp.path().join("anymal_run"), 10, &cfg, Some(Arc::new(client.clone())))
            .unwrap();

    logger.store_config(&EnvConfig::from(json!({"num_envs": 16})), &cfg).unwrap();
    logger.add_scalar("Perf/total_fps", 51200.0, Some(0)).unwrap();
    assert_eq!(logger.add_video_files(&temp.path().join("videos"), 0, DEFAULT_VIDEO_FPS).unwrap(), 0);
    logger.stop().unwrap();

    assert_eq!(client.sessions()[0].run_name, "anymal_run");
    assert_eq!(client.config()["alg_cfg"], json!({"clip_param": 0.2}));
    assert_eq!(client.logs().len(), 1);
    assert_eq!(client.finish_count(), 1);
}

#[test]
fn test_tensorboard_logger_needs_no_client() {
    let temp = TempDir::new().unwrap();
    let mut logger =
        create_logger(temp.path().join("run"), 10, &json!({"logger": "tensorboard"}), None).unwrap();

    logger.add_scalar("Loss/entropy", 0.7, Some(3)).unwrap();
    logger.stop().unwrap();

    let files: Vec<_> = std::fs::read_dir(temp.path().join("run")).unwrap().collect();
    assert_eq!(files.len(), 1);
}

//! Weights & Biases tracking client.
//!
//! Talks to the W&B HTTP API directly: GraphQL for run metadata and signed
//! upload URLs, and the run file stream for history rows and run completion.

use chrono::Utc;
use reqwest::blocking::{Client, Response};
use runlog_abstraction::{
    non_finite_token, relative_name, Payload, SessionSpec, TrackingClient, TrackingError,
    TrackingSession, VideoSpec,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Default W&B API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.wandb.ai";

const HISTORY_FILE: &str = "wandb-history.jsonl";
const SUMMARY_FILE: &str = "wandb-summary.json";

const UPSERT_BUCKET: &str = r"
mutation UpsertBucket(
    $id: String, $name: String, $project: String, $entity: String,
    $displayName: String, $config: JSONString
) {
    upsertBucket(input: {
        id: $id, name: $name, modelName: $project, entityName: $entity,
        displayName: $displayName, config: $config
    }) {
        bucket { id name displayName project { name entity { name } } }
        inserted
    }
}";

const RUN_UPLOAD_URLS: &str = r"
query RunUploadUrls($name: String!, $files: [String]!, $entity: String, $run: String!) {
    model(name: $name, entityName: $entity) {
        bucket(name: $run) {
            id
            files(names: $files) {
                uploadHeaders
                edges { node { name url(upload: true) } }
            }
        }
    }
}";

/// Credentials and endpoint for a W&B server.
#[derive(Clone)]
pub struct WandbSettings {
    /// API key, sent as the basic-auth password of user `api`.
    pub api_key: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Fixed run id. A random one is generated per session when unset.
    pub run_id: Option<String>,
}

impl fmt::Debug for WandbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WandbSettings")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl WandbSettings {
    /// Creates settings for the hosted service.
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), run_id: None }
    }

    /// Loads settings from `WANDB_API_KEY`, `WANDB_BASE_URL` and `WANDB_RUN_ID`.
    ///
    /// # Errors
    /// Returns `TrackingError::ServiceUnavailable` if no API key is set.
    pub fn from_env() -> Result<Self, TrackingError> {
        let api_key = std::env::var("WANDB_API_KEY").map_err(|_| {
            TrackingError::ServiceUnavailable(
                "WANDB_API_KEY environment variable not set".to_string(),
            )
        })?;
        let mut settings = Self::new(api_key);
        if let Ok(base_url) = std::env::var("WANDB_BASE_URL") {
            settings = settings.with_base_url(base_url);
        }
        settings.run_id = std::env::var("WANDB_RUN_ID").ok();
        Ok(settings)
    }

    /// Points the client at a self-managed server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Uses a fixed run id, e.g. to resume a run.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

#[derive(Deserialize)]
struct GraphqlResponse {
    data: Option<Value>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

/// Fully resolved location of a run.
#[derive(Debug, Clone)]
struct RunPath {
    entity: String,
    project: String,
    run_id: String,
    storage_id: String,
}

#[derive(Debug)]
struct WandbApi {
    settings: WandbSettings,
    http: Client,
}

impl WandbApi {
    fn graphql(&self, query: &str, variables: Value) -> Result<Value, TrackingError> {
        let url = format!("{}/graphql", self.settings.base_url);
        let response = self
            .http
            .post(&url)
            .basic_auth("api", Some(&self.settings.api_key))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .map_err(|e| request_error(&e, &self.settings.base_url))?;

        let body: GraphqlResponse = check_status(response)?
            .json()
            .map_err(|e| TrackingError::Serialization(format!("invalid GraphQL response: {e}")))?;

        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            let message = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");
            error!(error = %message, "W&B GraphQL request failed");
            return Err(TrackingError::Response { status: 200, body: message });
        }

        body.data
            .ok_or_else(|| TrackingError::Serialization("GraphQL response has no data".to_string()))
    }

    fn file_stream(&self, run: &RunPath, body: &Value) -> Result<(), TrackingError> {
        let url = format!(
            "{}/files/{}/{}/{}/file_stream",
            self.settings.base_url, run.entity, run.project, run.run_id
        );
        let response = self
            .http
            .post(&url)
            .basic_auth("api", Some(&self.settings.api_key))
            .json(body)
            .send()
            .map_err(|e| request_error(&e, &self.settings.base_url))?;
        check_status(response)?;
        Ok(())
    }

    fn upload(&self, run: &RunPath, name: &str, bytes: Vec<u8>) -> Result<(), TrackingError> {
        let data = self.graphql(
            RUN_UPLOAD_URLS,
            json!({
                "name": run.project,
                "entity": run.entity,
                "run": run.run_id,
                "files": [name],
            }),
        )?;

        let files = &data["model"]["bucket"]["files"];
        let url = files["edges"]
            .as_array()
            .and_then(|edges| edges.iter().find(|e| e["node"]["name"] == name))
            .and_then(|e| e["node"]["url"].as_str())
            .ok_or_else(|| {
                TrackingError::Serialization(format!("no upload url returned for {name}"))
            })?;

        debug!(name, size = bytes.len(), "Uploading file to W&B");

        let mut request = self.http.put(url).body(bytes);
        if let Some(headers) = files["uploadHeaders"].as_array() {
            for header in headers.iter().filter_map(Value::as_str) {
                if let Some((key, value)) = header.split_once(':') {
                    request = request.header(key.trim(), value.trim());
                }
            }
        }
        let response = request.send().map_err(|e| request_error(&e, url))?;
        check_status(response)?;
        Ok(())
    }
}

fn request_error(err: &reqwest::Error, endpoint: &str) -> TrackingError {
    error!(error = %err, endpoint, "Failed to reach W&B");
    if err.is_connect() {
        TrackingError::ServiceUnavailable(format!("W&B server not reachable at {endpoint}"))
    } else {
        TrackingError::Request(format!("Network error: {err}"))
    }
}

fn check_status(response: Response) -> Result<Response, TrackingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_else(|_| "Unknown error".to_string());
    error!(status = %status, error = %body, "W&B API returned error status");
    Err(TrackingError::Response { status: status.as_u16(), body })
}

fn file_chunk(offset: u64, lines: Vec<String>) -> Value {
    json!({ "offset": offset, "content": lines })
}

/// Serializes a history row, writing non-finite scalars as the bare `NaN`,
/// `Infinity` and `-Infinity` tokens the history stream accepts.
fn history_line(row: &Payload) -> Result<String, TrackingError> {
    let mut fields = Vec::with_capacity(row.len());
    for (key, value) in row {
        let encoded = match non_finite_token(value) {
            Some(token) => token.to_string(),
            None => serde_json::to_string(value)?,
        };
        fields.push(format!("{}:{encoded}", serde_json::to_string(key)?));
    }
    Ok(format!("{{{}}}", fields.join(",")))
}

fn generate_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[allow(clippy::cast_precision_loss)]
fn timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// `TrackingClient` for Weights & Biases.
#[derive(Debug, Clone)]
pub struct WandbClient {
    api: Arc<WandbApi>,
}

impl WandbClient {
    /// Creates a client from explicit settings.
    #[must_use]
    pub fn new(settings: WandbSettings) -> Self {
        Self { api: Arc::new(WandbApi { settings, http: Client::new() }) }
    }

    /// Creates a client from the `WANDB_*` environment variables.
    ///
    /// # Errors
    /// Returns `TrackingError::ServiceUnavailable` if no API key is set.
    pub fn from_env() -> Result<Self, TrackingError> {
        Ok(Self::new(WandbSettings::from_env()?))
    }
}

impl TrackingClient for WandbClient {
    fn id(&self) -> &'static str {
        "wandb"
    }

    fn open_session(&self, spec: &SessionSpec) -> Result<Box<dyn TrackingSession>, TrackingError> {
        let run_id = self.api.settings.run_id.clone().unwrap_or_else(generate_run_id);

        debug!(
            project = %spec.project,
            entity = ?spec.entity,
            run_name = %spec.run_name,
            run_id = %run_id,
            "Opening W&B run"
        );

        let data = self.api.graphql(
            UPSERT_BUCKET,
            json!({
                "name": run_id,
                "project": spec.project,
                "entity": spec.entity,
                "displayName": spec.run_name,
            }),
        )?;

        let bucket = &data["upsertBucket"]["bucket"];
        let storage_id = bucket["id"]
            .as_str()
            .ok_or_else(|| TrackingError::Serialization("upsertBucket returned no run id".to_string()))?
            .to_string();
        let entity = bucket["project"]["entity"]["name"]
            .as_str()
            .map(str::to_string)
            .or_else(|| spec.entity.clone())
            .ok_or_else(|| {
                TrackingError::Serialization("upsertBucket returned no entity".to_string())
            })?;
        let project = bucket["project"]["name"].as_str().unwrap_or(&spec.project).to_string();

        info!(entity = %entity, project = %project, run_id = %run_id, "W&B run started");

        Ok(Box::new(WandbSession::new(
            Arc::clone(&self.api),
            RunPath { entity, project, run_id, storage_id },
        )))
    }
}

/// An open W&B run.
///
/// History rows are assembled per step: values logged at the same step are
/// merged, and a row is sent once a later step is logged or the run finishes.
#[derive(Debug)]
pub struct WandbSession {
    api: Arc<WandbApi>,
    run: RunPath,
    config: Payload,
    pending: Payload,
    summary: Payload,
    step: u64,
    history_offset: u64,
    started: Instant,
    finished: bool,
}

impl WandbSession {
    fn new(api: Arc<WandbApi>, run: RunPath) -> Self {
        Self {
            api,
            run,
            config: Payload::new(),
            pending: Payload::new(),
            summary: Payload::new(),
            step: 0,
            history_offset: 0,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Id of the run on the server.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    fn commit(&mut self) -> Result<(), TrackingError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut row = std::mem::take(&mut self.pending);
        row.insert("_step".to_string(), json!(self.step));
        row.insert("_runtime".to_string(), json!(self.started.elapsed().as_secs_f64()));
        row.insert("_timestamp".to_string(), json!(timestamp()));

        let line = history_line(&row)?;
        let mut files = Payload::new();
        files.insert(HISTORY_FILE.to_string(), file_chunk(self.history_offset, vec![line]));
        self.api.file_stream(&self.run, &json!({ "files": files }))?;

        self.history_offset += 1;
        self.summary.extend(row);
        self.step += 1;
        Ok(())
    }
}

impl TrackingSession for WandbSession {
    fn update_config(&mut self, values: Payload) -> Result<(), TrackingError> {
        self.config.extend(values);

        let wrapped: Payload = self
            .config
            .iter()
            .map(|(k, v)| (k.clone(), json!({ "value": v, "desc": null })))
            .collect();

        self.api.graphql(
            UPSERT_BUCKET,
            json!({
                "id": self.run.storage_id,
                "name": self.run.run_id,
                "project": self.run.project,
                "entity": self.run.entity,
                "config": serde_json::to_string(&wrapped)?,
            }),
        )?;
        Ok(())
    }

    fn log(&mut self, values: Payload, step: Option<u64>) -> Result<(), TrackingError> {
        match step {
            Some(step) if step < self.step => {
                warn!(
                    step,
                    current_step = self.step,
                    "Dropping W&B log call for a step that was already committed"
                );
                return Ok(());
            }
            Some(step) if step > self.step => {
                self.commit()?;
                self.step = step;
            }
            _ => {}
        }

        self.pending.extend(values);

        if step.is_none() {
            self.commit()?;
        }
        Ok(())
    }

    fn save_file(&mut self, path: &Path, base_path: &Path) -> Result<(), TrackingError> {
        let name = relative_name(path, base_path);
        let bytes = std::fs::read(path)?;
        self.api.upload(&self.run, &name, bytes)
    }

    fn log_video(
        &mut self,
        key: &str,
        video: &VideoSpec,
        step: Option<u64>,
    ) -> Result<(), TrackingError> {
        if let Some(step) = step.filter(|s| *s < self.step) {
            warn!(
                step,
                current_step = self.step,
                video = %video.path.display(),
                "Skipping W&B video upload for a step that was already committed"
            );
            return Ok(());
        }

        let bytes = std::fs::read(&video.path)?;
        let size = bytes.len();
        let digest = hex::encode(Sha256::digest(&bytes));
        let at = step.unwrap_or(self.step);
        let name = format!("media/videos/{key}_{at}_{}.{}", &digest[..20], video.format);

        self.api.upload(&self.run, &name, bytes)?;

        let mut values = Payload::new();
        values.insert(
            key.to_string(),
            json!({
                "_type": "video-file",
                "path": name,
                "sha256": digest,
                "size": size,
            }),
        );
        self.log(values, step)
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        if self.finished {
            warn!(run_id = %self.run.run_id, "W&B run already finished");
            return Ok(());
        }
        self.commit()?;

        let mut files = Payload::new();
        files.insert(
            SUMMARY_FILE.to_string(),
            file_chunk(0, vec![history_line(&self.summary)?]),
        );
        self.api.file_stream(
            &self.run,
            &json!({ "files": files, "complete": true, "exitcode": 0 }),
        )?;

        self.finished = true;
        info!(run_id = %self.run.run_id, "W&B run finished");
        Ok(())
    }
}

impl Drop for WandbSession {
    fn drop(&mut self) {
        if !self.finished {
            warn!(run_id = %self.run.run_id, "W&B session dropped without finishing the run");
        }
    }
}

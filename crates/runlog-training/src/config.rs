use crate::error::{WriterError, WriterResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Runner config key naming the remote project.
pub const PROJECT_KEY: &str = "wandb_project";
/// Runner config key naming the owning user or team.
pub const ENTITY_KEY: &str = "wandb_entity";
/// Runner config key selecting the logger backend.
pub const LOGGER_KEY: &str = "logger";

/// Remote tracking settings read from a runner config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub project: String,
    #[serde(default)]
    pub entity: Option<String>,
}

impl TrackingConfig {
    /// Reads `wandb_project` (required) and `wandb_entity` (optional).
    pub fn from_mapping(cfg: &Value) -> WriterResult<Self> {
        let project = optional_string(cfg, PROJECT_KEY)?.ok_or_else(|| WriterError::missing(PROJECT_KEY))?;
        let entity = optional_string(cfg, ENTITY_KEY)?;
        Ok(Self { project, entity })
    }
}

fn optional_string(cfg: &Value, key: &str) -> WriterResult<Option<String>> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(WriterError::Config(format!("{key} must be a string, got {other}"))),
    }
}

/// Loads a runner config file into a JSON mapping.
///
/// The format is picked from the extension: `.toml`, `.json`, `.yaml` or `.yml`.
pub fn load_mapping(path: &Path) -> WriterResult<Value> {
    let contents = std::fs::read_to_string(path)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();

    let value: Value = match ext.as_str() {
        "toml" => toml::from_str(&contents)
            .map_err(|e| WriterError::Config(format!("failed to parse {}: {e}", path.display())))?,
        "json" => serde_json::from_str(&contents)?,
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .map_err(|e| WriterError::Config(format!("failed to parse {}: {e}", path.display())))?,
        _ => {
            return Err(WriterError::Config(format!(
                "unsupported config format: {}",
                path.display()
            )));
        }
    };

    if !value.is_object() {
        return Err(WriterError::Config(format!(
            "config file {} must contain a mapping at the top level",
            path.display()
        )));
    }
    Ok(value)
}

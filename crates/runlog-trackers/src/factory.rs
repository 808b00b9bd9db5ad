//! Tracker factory for creating tracking clients from configuration.
//!
//! This module creates `TrackingClient` instances by backend name, loading
//! credentials from environment variables when they are not given explicitly.

use crate::{RecordingClient, WandbClient, WandbSettings};
use runlog_abstraction::{TrackingClient, TrackingError};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Tracking backend enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerType {
    /// In-memory recording client.
    Recording,
    /// Weights & Biases.
    Wandb,
}

impl FromStr for TrackerType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recording" | "mock" | "dry-run" => Ok(Self::Recording),
            "wandb" | "weights-and-biases" => Ok(Self::Wandb),
            _ => Err(()),
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// The backend to create.
    pub tracker_type: TrackerType,
    /// Optional API key (if not provided, will be loaded from environment).
    pub api_key: Option<String>,
    /// Optional base URL for self-managed servers.
    pub base_url: Option<String>,
}

impl TrackerConfig {
    /// Creates a new `TrackerConfig` for the given backend.
    #[must_use]
    pub fn new(tracker_type: TrackerType) -> Self {
        Self { tracker_type, api_key: None, base_url: None }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Factory for creating tracking clients.
pub struct TrackerFactory;

impl TrackerFactory {
    /// Creates a tracking client from the given configuration.
    ///
    /// # Errors
    /// Returns `TrackingError::ServiceUnavailable` if credentials are missing.
    pub fn create(config: TrackerConfig) -> Result<Arc<dyn TrackingClient>, TrackingError> {
        debug!(tracker_type = ?config.tracker_type, "Creating tracking client");

        match config.tracker_type {
            TrackerType::Recording => Ok(Arc::new(RecordingClient::new())),
            TrackerType::Wandb => {
                let mut settings = if let Some(api_key) = config.api_key {
                    WandbSettings::new(api_key)
                } else {
                    WandbSettings::from_env()?
                };
                if let Some(base_url) = config.base_url {
                    settings = settings.with_base_url(base_url);
                }
                Ok(Arc::new(WandbClient::new(settings)))
            }
        }
    }

    /// Creates a tracking client from a backend name.
    ///
    /// # Errors
    /// Returns `TrackingError::ServiceUnavailable` if the name is unknown or
    /// credentials are missing.
    pub fn create_from_str(tracker_type_str: &str) -> Result<Arc<dyn TrackingClient>, TrackingError> {
        let tracker_type = TrackerType::from_str(tracker_type_str).map_err(|()| {
            error!(tracker_type = %tracker_type_str, "Unrecognized tracker type");
            TrackingError::ServiceUnavailable(format!(
                "Unrecognized tracker type: {}",
                tracker_type_str
            ))
        })?;
        Self::create(TrackerConfig::new(tracker_type))
    }
}

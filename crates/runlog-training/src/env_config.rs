//! Environment configuration in the two shapes a training script hands over.
//!
//! Environment configs are either objects that know how to turn themselves
//! into a mapping (`ToMapping`), or plain records serialized field by field.

use crate::error::{WriterError, WriterResult};
use runlog_abstraction::Payload;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A config object with its own mapping conversion.
pub trait ToMapping {
    /// Converts the object into a key-value mapping.
    fn to_mapping(&self) -> anyhow::Result<Payload>;

    /// Field-by-field record of the object, used when `to_mapping` fails.
    fn to_record(&self) -> Option<Value> {
        None
    }
}

/// Environment configuration passed to `MetricsWriter::store_config`.
pub enum EnvConfig<'a> {
    /// An object exposing `to_mapping`.
    Convertible(&'a dyn ToMapping),
    /// A structural record, already converted.
    Record(Value),
}

impl EnvConfig<'_> {
    /// Converts any serializable record structurally.
    pub fn record<T: Serialize + ?Sized>(cfg: &T) -> WriterResult<Self> {
        serde_json::to_value(cfg)
            .map(Self::Record)
            .map_err(|e| WriterError::ConversionFailure(e.to_string()))
    }

    /// Resolves the config into the value stored under `env_cfg`.
    pub fn resolve(&self) -> WriterResult<Value> {
        match self {
            Self::Record(value) => Ok(value.clone()),
            Self::Convertible(source) => match source.to_mapping() {
                Ok(mapping) => Ok(Value::Object(mapping)),
                Err(err) => {
                    debug!(error = %err, "to_mapping failed, falling back to the structural record");
                    source.to_record().ok_or_else(|| {
                        WriterError::ConversionFailure(format!(
                            "to_mapping failed ({err}) and no structural record is available"
                        ))
                    })
                }
            },
        }
    }
}

impl<'a, T: ToMapping> From<&'a T> for EnvConfig<'a> {
    fn from(source: &'a T) -> Self {
        Self::Convertible(source)
    }
}

impl From<Value> for EnvConfig<'_> {
    fn from(value: Value) -> Self {
        Self::Record(value)
    }
}
